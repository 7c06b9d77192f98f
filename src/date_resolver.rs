//! Publication date extraction.
//!
//! Strategies run in a fixed order and stop at the first one that parses:
//! meta tags, JSON-LD, `<time datetime>`, the search-result date, and (social
//! posts only) the timestamp embedded in the status identifier. Each attempt
//! is kept as a [`DateHint`] so the audit shows what was seen. No strategy
//! reads dates out of body text, and there is no "assume recent" fallback.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};

use crate::candidate::{DateHint, DateMethod};
use crate::chronology::snowflake_instant;
use crate::error::{CurationError, Result};

/// Meta tags in priority order; matched against `property` or `name`.
const META_KEYS: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "pubdate",
    "date",
    "DC.date",
    "sailthru.date",
];

/// Inputs to a resolution. Everything the resolver may look at is listed here.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateSources<'a> {
    pub url: &'a str,
    pub html: Option<&'a str>,
    pub search_date: Option<&'a str>,
    /// Present for social posts only.
    pub status_id: Option<u64>,
}

#[derive(Debug)]
pub struct Resolution {
    pub hints: Vec<DateHint>,
    pub outcome: Result<(DateTime<Utc>, DateMethod)>,
}

pub fn resolve(src: &DateSources<'_>, now: DateTime<Utc>) -> Resolution {
    let mut hints = Vec::new();

    if let Some(html) = src.html {
        let doc = Html::parse_document(html);
        let strategies: [fn(&Html) -> Vec<DateHint>; 3] =
            [meta_hints, json_ld_hints, time_tag_hints];
        for strategy in strategies {
            let found = strategy(&doc);
            let hit = found.iter().find_map(|h| h.parsed.map(|d| (d, h.method)));
            hints.extend(found);
            if let Some(hit) = hit {
                return Resolution {
                    hints,
                    outcome: Ok(hit),
                };
            }
        }
    }

    if let Some(raw) = src.search_date.map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = parse_search_date(raw, now);
        hints.push(DateHint {
            method: DateMethod::SearchSnippet,
            raw: raw.to_string(),
            parsed,
        });
        if let Some(d) = parsed {
            return Resolution {
                hints,
                outcome: Ok((d, DateMethod::SearchSnippet)),
            };
        }
    }

    if let Some(id) = src.status_id {
        let parsed = snowflake_instant(id);
        hints.push(DateHint {
            method: DateMethod::StatusIdTimestamp,
            raw: id.to_string(),
            parsed,
        });
        if let Some(d) = parsed {
            return Resolution {
                hints,
                outcome: Ok((d, DateMethod::StatusIdTimestamp)),
            };
        }
    }

    let detail = match hints.len() {
        0 => "no date source available".to_string(),
        n => format!("{n} hint(s), none parseable"),
    };
    Resolution {
        hints,
        outcome: Err(CurationError::DateExtractionFailure {
            url: src.url.to_string(),
            detail,
        }),
    }
}

fn meta_hints(doc: &Html) -> Vec<DateHint> {
    let sel = Selector::parse("meta[content]").unwrap();
    let metas: Vec<_> = doc.select(&sel).collect();
    let mut out = Vec::new();
    for key in META_KEYS {
        let found = metas.iter().find(|m| {
            let v = m.value();
            v.attr("property").is_some_and(|p| p.eq_ignore_ascii_case(key))
                || v.attr("name").is_some_and(|n| n.eq_ignore_ascii_case(key))
        });
        if let Some(content) = found.and_then(|m| m.value().attr("content")) {
            out.push(hint(DateMethod::MetaTag, content));
        }
    }
    out
}

fn json_ld_hints(doc: &Html) -> Vec<DateHint> {
    let sel = Selector::parse(r#"script[type="application/ld+json"]"#).unwrap();
    let mut out = Vec::new();
    for script in doc.select(&sel) {
        let body: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body.trim()) else {
            continue;
        };
        collect_ld_dates(&value, &mut out);
    }
    out
}

fn collect_ld_dates(v: &serde_json::Value, out: &mut Vec<DateHint>) {
    match v {
        serde_json::Value::Array(items) => {
            for it in items {
                collect_ld_dates(it, out);
            }
        }
        serde_json::Value::Object(map) => {
            for key in ["datePublished", "dateCreated"] {
                if let Some(s) = map.get(key).and_then(|x| x.as_str()) {
                    out.push(hint(DateMethod::StructuredData, s));
                }
            }
            if let Some(graph) = map.get("@graph") {
                collect_ld_dates(graph, out);
            }
        }
        _ => {}
    }
}

fn time_tag_hints(doc: &Html) -> Vec<DateHint> {
    let sel = Selector::parse("time[datetime]").unwrap();
    doc.select(&sel)
        .filter_map(|t| t.value().attr("datetime"))
        .map(|s| hint(DateMethod::BylineTime, s))
        .collect()
}

fn hint(method: DateMethod, raw: &str) -> DateHint {
    let raw = raw.trim();
    DateHint {
        method,
        raw: raw.to_string(),
        parsed: parse_absolute(raw),
    }
}

/// Absolute timestamp formats seen in page metadata. Zone-less values are UTC.
pub fn parse_absolute(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(d) = DateTime::parse_from_str(s, fmt) {
            return Some(d.with_timezone(&Utc));
        }
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&n));
        }
    }
    // Bare date, or a date followed by a time part none of the formats above took.
    let (head, rest) = (s.get(..10)?, s.get(10..)?);
    if !(rest.is_empty() || rest.starts_with(['T', ' '])) {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n))
}

/// Search-result dates: absolute formats plus `N minutes/hours/days ago` against `now`.
pub fn parse_search_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    static RE_REL: OnceCell<Regex> = OnceCell::new();
    let re = RE_REL
        .get_or_init(|| Regex::new(r"(?i)^(\d+)\s+(minute|hour|day)s?\s+ago\b").unwrap());
    if let Some(c) = re.captures(s.trim()) {
        let n: i64 = c.get(1)?.as_str().parse().ok()?;
        let unit = c.get(2)?.as_str().to_ascii_lowercase();
        let delta = match unit.as_str() {
            "minute" => Duration::try_minutes(n)?,
            "hour" => Duration::try_hours(n)?,
            _ => Duration::try_days(n)?,
        };
        return now.checked_sub_signed(delta);
    }
    parse_absolute(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).unwrap()
    }

    fn resolve_html(html: &str) -> Resolution {
        resolve(
            &DateSources {
                url: "https://example.test/a",
                html: Some(html),
                ..Default::default()
            },
            now(),
        )
    }

    #[test]
    fn meta_tag_wins_over_later_strategies() {
        let html = r#"<html><head>
            <meta property="article:published_time" content="2026-02-22T08:30:00Z">
            <script type="application/ld+json">{"datePublished":"2026-01-01T00:00:00Z"}</script>
            </head><body><time datetime="2025-12-01">x</time></body></html>"#;
        let r = resolve_html(html);
        let (d, m) = r.outcome.unwrap();
        assert_eq!(m, DateMethod::MetaTag);
        assert_eq!(d, Utc.with_ymd_and_hms(2026, 2, 22, 8, 30, 0).unwrap());
    }

    #[test]
    fn unparseable_meta_falls_through_to_json_ld_graph() {
        let html = r#"<html><head>
            <meta name="pubdate" content="yesterday-ish">
            <script type="application/ld+json">
              {"@context":"https://schema.org","@graph":[{"@type":"WebPage"},
               {"@type":"NewsArticle","datePublished":"2026-02-22T10:00:00-05:00"}]}
            </script></head></html>"#;
        let r = resolve_html(html);
        let (d, m) = r.outcome.unwrap();
        assert_eq!(m, DateMethod::StructuredData);
        assert_eq!(d, Utc.with_ymd_and_hms(2026, 2, 22, 15, 0, 0).unwrap());
        assert_eq!(r.hints[0].method, DateMethod::MetaTag);
        assert!(r.hints[0].parsed.is_none());
    }

    #[test]
    fn time_tag_without_zone_is_utc() {
        let r = resolve_html(r#"<p>By staff <time datetime="2026-02-22 09:15">Feb 22</time></p>"#);
        let (d, m) = r.outcome.unwrap();
        assert_eq!(m, DateMethod::BylineTime);
        assert_eq!(d, Utc.with_ymd_and_hms(2026, 2, 22, 9, 15, 0).unwrap());
    }

    #[test]
    fn date_prefix_with_trailing_text_is_not_a_date() {
        assert_eq!(parse_absolute("2026-02-22xyz"), None);
        assert_eq!(parse_absolute("2026-02-2212"), None);
        assert_eq!(
            parse_absolute("2026-02-22"),
            Some(Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap())
        );

        let html = r#"<html><head>
            <meta property="article:published_time" content="2026-02-22xyz">
            </head><body><time datetime="2026-02-21T07:00:00Z">x</time></body></html>"#;
        let r = resolve_html(html);
        let (d, m) = r.outcome.unwrap();
        assert_eq!(m, DateMethod::BylineTime);
        assert_eq!(d, Utc.with_ymd_and_hms(2026, 2, 21, 7, 0, 0).unwrap());
    }

    #[test]
    fn search_snippet_relative_and_rfc2822() {
        assert_eq!(
            parse_search_date("3 hours ago", now()),
            Some(Utc.with_ymd_and_hms(2026, 2, 23, 9, 0, 0).unwrap())
        );
        assert_eq!(
            parse_search_date("Mon, 23 Feb 2026 06:00:00 GMT", now()),
            Some(Utc.with_ymd_and_hms(2026, 2, 23, 6, 0, 0).unwrap())
        );
        assert_eq!(
            parse_search_date("2026-02-21", now()),
            Some(Utc.with_ymd_and_hms(2026, 2, 21, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_search_date("recently", now()), None);
    }

    #[test]
    fn page_text_is_never_a_date_source() {
        let html = "<html><body><p>Published February 23, 2026 - today</p></body></html>";
        let r = resolve_html(html);
        match r.outcome {
            Err(CurationError::DateExtractionFailure { detail, .. }) => {
                assert_eq!(detail, "no date source available")
            }
            other => panic!("expected date failure, got {other:?}"),
        }
        assert!(r.hints.is_empty());
    }

    #[test]
    fn status_id_is_last_resort_for_social_posts() {
        let id: u64 = 1_893_000_000_000_000_000;
        let r = resolve(
            &DateSources {
                url: "https://x.com/a/status/1",
                html: None,
                search_date: Some("n/a"),
                status_id: Some(id),
            },
            now(),
        );
        let (_, m) = r.outcome.unwrap();
        assert_eq!(m, DateMethod::StatusIdTimestamp);
        assert_eq!(r.hints.len(), 2);
    }
}
