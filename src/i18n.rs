//! Request culture negotiation and the localized error catalog

use std::fmt;

use crate::error::ErrorCode;

/// Name of the cookie that pins a culture
pub const CULTURE_COOKIE: &str = "culture";

/// Cultures the server can render messages in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    EnUs,
    RuRu,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::EnUs, Locale::RuRu];

    pub fn tag(&self) -> &'static str {
        match self {
            Locale::EnUs => "en-US",
            Locale::RuRu => "ru-RU",
        }
    }

    /// Match a culture tag. A bare language ("ru") selects its culture.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        Self::ALL.into_iter().find(|locale| {
            let full = locale.tag();
            tag.eq_ignore_ascii_case(full) || tag.eq_ignore_ascii_case(&full[..2])
        })
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Cultures enabled by configuration, with the fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cultures {
    pub default: Locale,
    pub supported: Vec<Locale>,
}

impl Cultures {
    /// Build from configured tags. Unknown tags are skipped; the default is
    /// always supported.
    pub fn from_tags(default: &str, supported: &[String]) -> Self {
        let default = Locale::from_tag(default).unwrap_or_default();
        let mut cultures: Vec<Locale> = supported.iter().filter_map(|t| Locale::from_tag(t)).collect();
        if !cultures.contains(&default) {
            cultures.insert(0, default);
        }
        cultures.dedup();
        Self {
            default,
            supported: cultures,
        }
    }

    fn accept(&self, tag: &str) -> Option<Locale> {
        Locale::from_tag(tag).filter(|l| self.supported.contains(l))
    }

    /// Pick the request culture: explicit query value, then cookie, then the
    /// best `Accept-Language` entry, then the default
    pub fn negotiate(
        &self,
        query: Option<&str>,
        cookie: Option<&str>,
        accept_language: Option<&str>,
    ) -> Locale {
        query
            .and_then(|q| self.accept(q))
            .or_else(|| cookie.and_then(|c| self.accept(c)))
            .or_else(|| accept_language.and_then(|h| self.from_accept_language(h)))
            .unwrap_or(self.default)
    }

    fn from_accept_language(&self, header: &str) -> Option<Locale> {
        let mut ranges: Vec<(f32, usize, &str)> = header
            .split(',')
            .enumerate()
            .filter_map(|(i, part)| {
                let mut pieces = part.split(';');
                let tag = pieces.next()?.trim();
                let quality = pieces
                    .find_map(|p| p.trim().strip_prefix("q="))
                    .map(|q| q.trim().parse::<f32>().unwrap_or(0.0))
                    .unwrap_or(1.0);
                (quality > 0.0 && !tag.is_empty()).then_some((quality, i, tag))
            })
            .collect();
        ranges.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ranges.into_iter().find_map(|(_, _, tag)| {
            let language = tag.split('-').next().unwrap_or(tag);
            self.accept(tag).or_else(|| self.accept(language))
        })
    }
}

impl Default for Cultures {
    fn default() -> Self {
        Self {
            default: Locale::EnUs,
            supported: Locale::ALL.to_vec(),
        }
    }
}

/// Client-facing text for an error code. English messages carry request
/// details and are left as produced; other cultures get catalog text.
pub fn error_message(code: ErrorCode, locale: Locale) -> Option<&'static str> {
    match locale {
        Locale::EnUs => None,
        Locale::RuRu => Some(match code {
            ErrorCode::Failure => "Внутренняя ошибка сервера",
            ErrorCode::NotAuthenticated => "Требуется вход в систему",
            ErrorCode::Forbidden => "Недостаточно прав",
            ErrorCode::DbFailure => "Ошибка базы данных",
            ErrorCode::NotFound => "Запись не найдена",
            ErrorCode::BadValue => "Некорректные данные",
            ErrorCode::Duplicate => "Запись с таким значением уже существует",
            ErrorCode::StaleVersion => "Запись была изменена другим пользователем",
            ErrorCode::InUse => "Запись используется и не может быть удалена",
            ErrorCode::StorageFailure => "Ошибка файлового хранилища",
            ErrorCode::Cancelled => "Запрос отменён",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(Locale::from_tag("ru-RU"), Some(Locale::RuRu));
        assert_eq!(Locale::from_tag("RU"), Some(Locale::RuRu));
        assert_eq!(Locale::from_tag("en-us"), Some(Locale::EnUs));
        assert_eq!(Locale::from_tag("de-DE"), None);
    }

    #[test]
    fn test_negotiation_order() {
        let cultures = Cultures::default();
        assert_eq!(cultures.negotiate(Some("ru-RU"), Some("en-US"), None), Locale::RuRu);
        assert_eq!(cultures.negotiate(Some("fr"), Some("ru-RU"), None), Locale::RuRu);
        assert_eq!(cultures.negotiate(None, None, Some("de;q=0.9, ru;q=0.8")), Locale::RuRu);
        assert_eq!(cultures.negotiate(None, None, Some("ru;q=0.5, en-GB;q=0.7")), Locale::EnUs);
        assert_eq!(cultures.negotiate(None, None, Some("ru;q=0")), Locale::EnUs);
        assert_eq!(cultures.negotiate(None, None, None), Locale::EnUs);
    }

    #[test]
    fn test_unsupported_culture_falls_back() {
        let cultures = Cultures::from_tags("en-US", &["en-US".to_string()]);
        assert_eq!(cultures.negotiate(Some("ru-RU"), None, Some("ru")), Locale::EnUs);
    }

    #[test]
    fn test_error_catalog() {
        assert_eq!(error_message(ErrorCode::NotFound, Locale::EnUs), None);
        assert_eq!(
            error_message(ErrorCode::InUse, Locale::RuRu),
            Some("Запись используется и не может быть удалена")
        );
    }
}
