//! Relevance score for a PASS candidate.
//!
//! Additive and explicit: every point comes from a named [`Signal`] so the
//! selection record shows exactly why one item outranked another.

use serde::{Deserialize, Serialize};

use crate::rules::{contains, count_hits, normalize, ScoringRules};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub rule: String,
    pub matched: String,
    pub points: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub score: i32,
    pub signals: Vec<Signal>,
}

impl ScoreCard {
    fn add(&mut self, rule: &str, matched: impl Into<String>, points: i32) {
        self.score += points;
        self.signals.push(Signal {
            rule: rule.to_string(),
            matched: matched.into(),
            points,
        });
    }
}

/// Score `headline` (plus the source name, as keyword context) against the table.
pub fn score(headline: &str, source: &str, rules: &ScoringRules) -> ScoreCard {
    let text = normalize(&format!("{headline} {source}"));
    let mut card = ScoreCard::default();

    let kw = &rules.keywords;
    for (tier, list, points) in [
        ("keyword.high", &kw.high, kw.high_points),
        ("keyword.medium", &kw.medium, kw.medium_points),
        ("keyword.low", &kw.low, kw.low_points),
    ] {
        for hit in count_hits(&text, list, false) {
            card.add(tier, hit, points);
        }
    }

    // decision relevance counts once per category
    for (name, sig) in [("market", &rules.market), ("geopolitical", &rules.geopolitical)] {
        if let Some(hit) = sig.phrases.iter().find(|p| contains(&text, p)) {
            card.add(name, hit.clone(), sig.points);
        }
    }

    let src = normalize(source);
    if let Some(b) = rules.source_boosts.iter().find(|b| contains(&src, &b.source)) {
        card.add("source_boost", b.source.clone(), b.points);
    }

    let pr = count_hits(&text, &rules.press_release.phrases, false);
    match pr.len() {
        0 => {}
        1 => card.add("press_release", pr.join(", "), rules.press_release.single),
        _ => card.add("press_release", pr.join(", "), rules.press_release.multiple),
    }

    for (name, p) in [("hedging", &rules.hedging), ("think_piece", &rules.think_piece)] {
        let hits = count_hits(&text, &p.phrases, true);
        if hits.len() >= p.min_hits.max(1) {
            card.add(name, hits.join(", "), p.points);
        }
    }

    for rule in &rules.extra {
        if rule.when.matches(&text) {
            let matched = rule.when.first_hit(&text).unwrap_or_default();
            card.add(&format!("extra.{}", rule.name), matched, rule.points);
        }
    }

    card
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, When};

    fn rules() -> ScoringRules {
        ScoringRules::default()
    }

    #[test]
    fn keyword_tiers_add_per_hit() {
        let card = score("OpenAI and Anthropic race on hospital pilots", "Axios", &rules());
        // openai, anthropic, hospital
        assert_eq!(card.score, 15);
        assert_eq!(card.signals.len(), 3);
    }

    #[test]
    fn market_and_geopolitical_count_once() {
        let card = score(
            "Tariffs and trade war deepen recession fears as NATO meets",
            "Reuters",
            &rules(),
        );
        let market: Vec<_> = card.signals.iter().filter(|s| s.rule == "market").collect();
        assert_eq!(market.len(), 1);
        assert_eq!(market[0].points, 7);
        assert!(card.signals.iter().any(|s| s.rule == "geopolitical" && s.points == 5));
    }

    #[test]
    fn source_boost_uses_first_match() {
        let card = score("Startup ships agent sandbox", "TechCrunch AI", &rules());
        assert!(card
            .signals
            .iter()
            .any(|s| s.rule == "source_boost" && s.points == 3));
    }

    #[test]
    fn press_release_shape_is_penalized() {
        let one = score("Vendor rolls out billing portal", "PR Newswire", &rules());
        assert!(one.signals.iter().any(|s| s.rule == "press_release" && s.points == -5));
        let two = score(
            "Acme partners with Globex, rolls out billing portal",
            "PR Newswire",
            &rules(),
        );
        assert!(two.signals.iter().any(|s| s.rule == "press_release" && s.points == -25));
    }

    #[test]
    fn hedging_needs_three_terms_and_whole_words() {
        let hedged = score(
            "Merger could reportedly close, sources say, but might slip",
            "Bloomberg",
            &rules(),
        );
        assert!(hedged.signals.iter().any(|s| s.rule == "hedging" && s.points == -10));
        let mayor = score("Mayor opens library", "SF Chronicle", &rules());
        assert!(!mayor.signals.iter().any(|s| s.rule == "hedging"));
    }

    #[test]
    fn think_piece_framing_is_penalized() {
        let card = score("Why AI matters for the enterprise", "Fortune", &rules());
        assert!(card.signals.iter().any(|s| s.rule == "think_piece" && s.points == -8));
    }

    #[test]
    fn extra_rules_apply_with_their_name() {
        let mut r = rules();
        r.extra.push(Rule {
            name: "space".into(),
            when: When::any_of(&["starship"]),
            points: 4,
        });
        let card = score("Starship reaches orbit", "Space.com", &r);
        assert_eq!(card.score, 4);
        assert_eq!(card.signals[0].rule, "extra.space");
    }
}
