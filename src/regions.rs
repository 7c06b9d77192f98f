//! Geographic bucket for General Awareness items.
//!
//! Explicit keyword table, first match in table order wins, whole-word matches
//! only ("oman" must not hit "woman"). Short acronyms match case-sensitively so
//! "us" the pronoun is not the United States. No match → the configured default.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::candidate::{Candidate, Section, Stage};
use crate::error::Result;

/// (keyword, region code). Acronyms in upper case are matched as written.
const REGION_KEYWORDS: &[(&str, &str)] = &[
    ("US", "US"),
    ("USA", "US"),
    ("U.S.", "US"),
    ("united states", "US"),
    ("america", "US"),
    ("washington", "US"),
    ("congress", "US"),
    ("UK", "GB"),
    ("britain", "GB"),
    ("british", "GB"),
    ("england", "GB"),
    ("united kingdom", "GB"),
    ("london", "GB"),
    ("north korea", "KP"),
    ("pyongyang", "KP"),
    ("south korea", "KR"),
    ("korea", "KR"),
    ("korean", "KR"),
    ("seoul", "KR"),
    ("china", "CN"),
    ("chinese", "CN"),
    ("beijing", "CN"),
    ("russia", "RU"),
    ("russian", "RU"),
    ("moscow", "RU"),
    ("putin", "RU"),
    ("ukraine", "UA"),
    ("ukrainian", "UA"),
    ("kyiv", "UA"),
    ("zelensky", "UA"),
    ("israel", "IL"),
    ("israeli", "IL"),
    ("gaza", "IL"),
    ("hamas", "IL"),
    ("palestine", "PS"),
    ("palestinian", "PS"),
    ("iran", "IR"),
    ("iranian", "IR"),
    ("tehran", "IR"),
    ("india", "IN"),
    ("indian", "IN"),
    ("delhi", "IN"),
    ("mumbai", "IN"),
    ("modi", "IN"),
    ("japan", "JP"),
    ("japanese", "JP"),
    ("tokyo", "JP"),
    ("germany", "DE"),
    ("german", "DE"),
    ("berlin", "DE"),
    ("france", "FR"),
    ("french", "FR"),
    ("paris", "FR"),
    ("macron", "FR"),
    ("italy", "IT"),
    ("italian", "IT"),
    ("rome", "IT"),
    ("milan", "IT"),
    ("spain", "ES"),
    ("madrid", "ES"),
    ("brazil", "BR"),
    ("brazilian", "BR"),
    ("mexico", "MX"),
    ("mexican", "MX"),
    ("canada", "CA"),
    ("canadian", "CA"),
    ("ottawa", "CA"),
    ("toronto", "CA"),
    ("australia", "AU"),
    ("australian", "AU"),
    ("sydney", "AU"),
    ("saudi arabia", "SA"),
    ("saudi", "SA"),
    ("riyadh", "SA"),
    ("turkey", "TR"),
    ("turkish", "TR"),
    ("ankara", "TR"),
    ("erdogan", "TR"),
    ("pakistan", "PK"),
    ("pakistani", "PK"),
    ("afghanistan", "AF"),
    ("afghan", "AF"),
    ("kabul", "AF"),
    ("taliban", "AF"),
    ("syria", "SY"),
    ("syrian", "SY"),
    ("damascus", "SY"),
    ("iraq", "IQ"),
    ("iraqi", "IQ"),
    ("baghdad", "IQ"),
    ("egypt", "EG"),
    ("egyptian", "EG"),
    ("cairo", "EG"),
    ("south africa", "ZA"),
    ("nigeria", "NG"),
    ("nigerian", "NG"),
    ("lagos", "NG"),
    ("kenya", "KE"),
    ("kenyan", "KE"),
    ("nairobi", "KE"),
    ("ethiopia", "ET"),
    ("sudan", "SD"),
    ("sudanese", "SD"),
    ("lebanon", "LB"),
    ("lebanese", "LB"),
    ("beirut", "LB"),
    ("bangladesh", "BD"),
    ("myanmar", "MM"),
    ("vietnam", "VN"),
    ("vietnamese", "VN"),
    ("indonesia", "ID"),
    ("jakarta", "ID"),
    ("philippines", "PH"),
    ("manila", "PH"),
    ("thailand", "TH"),
    ("bangkok", "TH"),
    ("singapore", "SG"),
    ("malaysia", "MY"),
    ("colombia", "CO"),
    ("argentina", "AR"),
    ("buenos aires", "AR"),
    ("chile", "CL"),
    ("peru", "PE"),
    ("venezuela", "VE"),
    ("qatar", "QA"),
    ("doha", "QA"),
    ("UAE", "AE"),
    ("dubai", "AE"),
    ("abu dhabi", "AE"),
    ("poland", "PL"),
    ("polish", "PL"),
    ("warsaw", "PL"),
    ("netherlands", "NL"),
    ("dutch", "NL"),
    ("sweden", "SE"),
    ("norway", "NO"),
    ("finland", "FI"),
    ("greece", "GR"),
    ("greek", "GR"),
    ("switzerland", "CH"),
    ("swiss", "CH"),
    ("EU", "EU"),
    ("europe", "EU"),
    ("european", "EU"),
    ("brussels", "EU"),
    ("NATO", "EU"),
];

struct Matcher {
    re: Regex,
    region: &'static str,
}

fn matchers() -> &'static [Matcher] {
    static M: OnceCell<Vec<Matcher>> = OnceCell::new();
    M.get_or_init(|| {
        REGION_KEYWORDS
            .iter()
            .map(|(kw, region)| {
                let acronym = kw.chars().any(|c| c.is_ascii_uppercase());
                let body = regex::escape(kw);
                // \b does not anchor after a trailing '.', so use explicit lookaround-free edges.
                let pat = if acronym {
                    format!(r"(?:^|[^A-Za-z0-9]){body}(?:$|[^A-Za-z0-9])")
                } else {
                    format!(r"(?i)\b{body}\b")
                };
                Matcher {
                    re: Regex::new(&pat).unwrap(),
                    region,
                }
            })
            .collect()
    })
}

/// Region code for a headline, or `default_region` when nothing matches.
pub fn detect_region(text: &str, default_region: &str) -> String {
    matchers()
        .iter()
        .find(|m| m.re.is_match(text))
        .map(|m| m.region.to_string())
        .unwrap_or_else(|| default_region.to_string())
}

/// Tag every PASS General Awareness candidate with its region bucket.
pub fn assign(candidates: &mut [Candidate], default_region: &str) -> Result<()> {
    for c in candidates
        .iter_mut()
        .filter(|c| c.is_pass() && c.section() == Some(Section::GeneralAwareness))
    {
        if c.region().is_some() {
            continue;
        }
        let region = detect_region(&c.match_text(), default_region);
        c.note(Stage::Tally, format!("region {region}"));
        c.set_region(region)?;
    }
    Ok(())
}
