//! # Semantic String Generation
//!
//! Dispatches faker methods through the `fake` crate's per-locale modules.
//! The locale is either fixed on the column or derived per row from an ISO
//! country code column through a curated mapping with an `en` fallback.

use rand::rngs::StdRng;

use crate::spec::FakerMethod;

/// Locales with full faker coverage in this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    FrFr,
    JaJp,
    PtBr,
    ZhCn,
    ArSa,
}

/// Resolve a fixed locale tag from the specification. Unknown tags are a
/// preflight error, so this is total over validated specs.
pub fn locale_for_tag(tag: &str) -> Option<Locale> {
    match tag {
        "en" => Some(Locale::En),
        "fr" => Some(Locale::FrFr),
        "ja" => Some(Locale::JaJp),
        "pt" => Some(Locale::PtBr),
        "zh" => Some(Locale::ZhCn),
        "ar" => Some(Locale::ArSa),
        _ => None,
    }
}

/// Curated ISO-3166 country code → locale mapping, `en` fallback.
pub fn locale_for_country(code: &str) -> Locale {
    match code.to_ascii_uppercase().as_str() {
        "FR" | "BE" | "CH" | "SN" | "CI" => Locale::FrFr,
        "JP" => Locale::JaJp,
        "BR" | "PT" | "AO" | "MZ" => Locale::PtBr,
        "CN" | "SG" | "TW" | "HK" => Locale::ZhCn,
        "SA" | "AE" | "EG" | "MA" | "JO" => Locale::ArSa,
        _ => Locale::En,
    }
}

/// Where each row's locale comes from.
pub enum LocaleSource {
    Fixed(Locale),
    PerRow(Vec<Locale>),
}

impl LocaleSource {
    fn at(&self, row: usize) -> Locale {
        match self {
            LocaleSource::Fixed(locale) => *locale,
            LocaleSource::PerRow(locales) => locales.get(row).copied().unwrap_or(Locale::En),
        }
    }
}

/// Generate a column of semantic strings.
pub fn faker_column(
    method: FakerMethod,
    locales: &LocaleSource,
    n: usize,
    rng: &mut StdRng,
) -> Vec<String> {
    (0..n).map(|row| fake_value(method, locales.at(row), row, rng)).collect()
}

/// One semantic string. The row index disambiguates emails so that unique
/// constraints on email columns stay satisfiable at scale.
pub fn fake_value(method: FakerMethod, locale: Locale, row: usize, rng: &mut StdRng) -> String {
    match locale {
        Locale::En => fake_en(method, row, rng),
        Locale::FrFr => fake_fr_fr(method, row, rng),
        Locale::JaJp => fake_ja_jp(method, row, rng),
        Locale::PtBr => fake_pt_br(method, row, rng),
        Locale::ZhCn => fake_zh_cn(method, row, rng),
        Locale::ArSa => fake_ar_sa(method, row, rng),
    }
}

macro_rules! locale_faker {
    ($fn_name:ident, $locale:ident) => {
        fn $fn_name(method: FakerMethod, row: usize, rng: &mut StdRng) -> String {
            use fake::faker::address::$locale::{
                BuildingNumber, CityName, CountryName, StreetName,
            };
            use fake::faker::company::$locale::CompanyName;
            use fake::faker::internet::$locale::SafeEmail;
            use fake::faker::lorem::$locale::Word;
            use fake::faker::name::$locale::{FirstName, LastName, Name};
            use fake::faker::phone_number::$locale::PhoneNumber;
            use fake::Fake;

            match method {
                FakerMethod::Name => Name().fake_with_rng(rng),
                FakerMethod::FirstName => FirstName().fake_with_rng(rng),
                FakerMethod::LastName => LastName().fake_with_rng(rng),
                FakerMethod::Email => {
                    let email: String = SafeEmail().fake_with_rng(rng);
                    match email.split_once('@') {
                        Some((local, domain)) => format!("{}.{}@{}", local, row, domain),
                        None => format!("user{}@example.com", row),
                    }
                }
                FakerMethod::Address => {
                    let number: String = BuildingNumber().fake_with_rng(rng);
                    let street: String = StreetName().fake_with_rng(rng);
                    format!("{} {}", number, street)
                }
                FakerMethod::City => CityName().fake_with_rng(rng),
                FakerMethod::Country => CountryName().fake_with_rng(rng),
                FakerMethod::Company => CompanyName().fake_with_rng(rng),
                FakerMethod::Word => Word().fake_with_rng(rng),
                FakerMethod::PhoneNumber => PhoneNumber().fake_with_rng(rng),
            }
        }
    };
}

locale_faker!(fake_en, en);
locale_faker!(fake_fr_fr, fr_fr);
locale_faker!(fake_ja_jp, ja_jp);
locale_faker!(fake_pt_br, pt_br);
locale_faker!(fake_zh_cn, zh_cn);
locale_faker!(fake_ar_sa, ar_sa);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::rng_for;

    #[test]
    fn test_email_contains_row_disambiguator() {
        let mut rng = rng_for(1, &["faker"]);
        let email = fake_value(FakerMethod::Email, Locale::En, 17, &mut rng);
        assert!(email.contains(".17@"), "got {}", email);
    }

    #[test]
    fn test_locale_mapping_falls_back_to_en() {
        assert_eq!(locale_for_country("FR"), Locale::FrFr);
        assert_eq!(locale_for_country("jp"), Locale::JaJp);
        assert_eq!(locale_for_country("ZZ"), Locale::En);
        assert_eq!(locale_for_tag("de"), None);
        assert_eq!(locale_for_tag("en"), Some(Locale::En));
    }

    #[test]
    fn test_faker_column_length_and_determinism() {
        let mut r1 = rng_for(9, &["names"]);
        let mut r2 = rng_for(9, &["names"]);
        let a = faker_column(FakerMethod::Name, &LocaleSource::Fixed(Locale::En), 20, &mut r1);
        let b = faker_column(FakerMethod::Name, &LocaleSource::Fixed(Locale::En), 20, &mut r2);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn test_per_row_locales() {
        let mut rng = rng_for(3, &["mixed"]);
        let locales = LocaleSource::PerRow(vec![Locale::En, Locale::FrFr]);
        let out = faker_column(FakerMethod::City, &locales, 2, &mut rng);
        assert_eq!(out.len(), 2);
    }
}
