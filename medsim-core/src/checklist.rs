//! Matching free-form trainee actions to checklist items.
//!
//! An explicit action id always wins. Otherwise the action text is matched
//! against keywords: the item's own `matching` block when present, then
//! built-in keyword families for common emergency-care actions, then the
//! significant words of the item's description. Negated phrasing ("don't
//! give oxygen yet") never matches.

use crate::blueprint::ChecklistItem;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a checklist match was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// The action carried the item's id.
    Exact,
    /// Matched one of the item's authored keywords.
    High,
    /// Matched a built-in or derived keyword.
    Medium,
}

/// A successful match.
#[derive(Debug, Clone)]
pub struct ChecklistMatch<'a> {
    /// The matched item.
    pub item: &'a ChecklistItem,
    /// Keyword that matched, absent for exact id matches.
    pub matched_keyword: Option<String>,
    /// How the match was made.
    pub confidence: MatchConfidence,
}

/// Built-in keyword families: `(trigger in item description, keywords)`.
const DEFAULT_KEYWORD_FAMILIES: &[(&str, &[&str])] = &[
    ("oxygen", &["oxygen", "o2", "non-rebreather", "nrb", "nasal cannula", "high-flow", "mask"]),
    ("high-flow", &["high-flow", "high flow", "15l", "15 l", "non-rebreather"]),
    ("salbutamol", &["salbutamol", "albuterol", "ventolin", "bronchodilator", "nebulizer", "neb"]),
    (
        "corticosteroid",
        &[
            "steroid",
            "corticosteroid",
            "hydrocortisone",
            "methylprednisolone",
            "dexamethasone",
            "prednisolone",
        ],
    ),
    ("adrenaline", &["adrenaline", "epinephrine", "epi"]),
    ("aspirin", &["aspirin", "asa"]),
    ("nitro", &["nitro", "nitroglycerin", "gtn", "nitrate"]),
    ("abcde", &["abcde", "abc", "primary survey", "systematic assessment"]),
    ("sample", &["sample", "history", "allergies", "medications", "past medical"]),
    (
        "vital",
        &[
            "vitals",
            "vital signs",
            "blood pressure",
            "bp",
            "pulse",
            "heart rate",
            "hr",
            "spo2",
            "respiratory rate",
            "rr",
        ],
    ),
    (
        "auscultation",
        &["auscultate", "auscultation", "listen", "breath sounds", "lung sounds", "chest sounds"],
    ),
    ("scene", &["scene", "safety", "safe", "hazard", "bsi", "ppe"]),
    ("ecg", &["ecg", "ekg", "cardiac monitor", "12-lead", "12 lead", "rhythm"]),
    ("monitor", &["monitor", "reassess", "recheck", "re-assess", "re-check"]),
    ("iv", &["iv", "intravenous", "cannula", "access", "line"]),
    ("airway", &["airway", "bvm", "bag valve", "intubate", "suction"]),
    ("spine", &["c-spine", "cspine", "cervical", "spine", "immobilization", "collar"]),
];

/// Phrases that veto a match unless the item defines its own list.
const DEFAULT_EXCLUSIONS: &[&str] = &[
    "don't", "dont", "not yet", "haven't", "havent", "won't", "wont", "shouldn't", "shouldnt",
    "wouldn't", "wouldnt", "no", "didn't", "didnt",
];

/// Words too generic to identify an item on their own.
const FALLBACK_STOP_WORDS: &[&str] = &[
    "patient", "patients", "check", "give", "apply", "assess", "administer", "perform", "provide",
    "ensure", "with", "from", "that", "this", "their", "then", "into",
];

/// Find the checklist item an action satisfies.
///
/// `is_completed` reports items already completed; those never match again.
/// An `action_id` naming no checklist item is logged and ignored, and the
/// text is matched instead.
#[must_use]
pub fn find_checklist_match<'a>(
    action_id: Option<&str>,
    action_text: &str,
    checklist: &'a [ChecklistItem],
    is_completed: impl Fn(&str) -> bool,
) -> Option<ChecklistMatch<'a>> {
    if let Some(id) = action_id {
        match checklist.iter().find(|item| item.id == id) {
            Some(item) if is_completed(&item.id) => return None,
            Some(item) => {
                return Some(ChecklistMatch {
                    item,
                    matched_keyword: None,
                    confidence: MatchConfidence::Exact,
                });
            }
            None => warn!(action_id = id, "Unknown checklist id, falling back to keywords"),
        }
    }

    let text = action_text.to_lowercase();
    if text.trim().is_empty() {
        return None;
    }

    checklist
        .iter()
        .filter(|item| !is_completed(&item.id))
        .filter(|item| !is_excluded(&text, item))
        .find_map(|item| {
            let (keywords, confidence) = keywords_for(item);
            keywords
                .into_iter()
                .find(|kw| contains_phrase(&text, kw))
                .map(|kw| ChecklistMatch {
                    item,
                    matched_keyword: Some(kw),
                    confidence,
                })
        })
}

/// Whether the action text is negated for this item.
#[must_use]
pub fn is_excluded(action_text_lower: &str, item: &ChecklistItem) -> bool {
    match item.matching.as_ref().and_then(|m| m.exclusion_keywords.as_ref()) {
        Some(custom) => custom
            .iter()
            .any(|kw| contains_phrase(action_text_lower, &kw.to_lowercase())),
        None => DEFAULT_EXCLUSIONS
            .iter()
            .any(|kw| contains_phrase(action_text_lower, kw)),
    }
}

/// Keywords for an item and how confident a match on them is.
fn keywords_for(item: &ChecklistItem) -> (Vec<String>, MatchConfidence) {
    if let Some(matching) = item.matching.as_ref().filter(|m| !m.keywords.is_empty()) {
        let authored = matching
            .keywords
            .iter()
            .chain(&matching.synonyms)
            .chain(&matching.tool_mappings)
            .map(|kw| kw.to_lowercase())
            .collect();
        return (authored, MatchConfidence::High);
    }

    let description = item.action.to_lowercase();
    if let Some((_, family)) = DEFAULT_KEYWORD_FAMILIES
        .iter()
        .find(|(trigger, _)| contains_phrase(&description, trigger))
    {
        return (family.iter().map(|kw| (*kw).to_string()).collect(), MatchConfidence::Medium);
    }

    let cleaned: String = description
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let words: Vec<String> = cleaned
        .split_whitespace()
        .filter(|w| w.len() >= 4 && !FALLBACK_STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        (vec![description], MatchConfidence::Medium)
    } else {
        (words, MatchConfidence::Medium)
    }
}

/// Phrase containment. Short single tokens ("hr", "iv", "no") must match a
/// whole word; longer phrases match as substrings.
fn contains_phrase(haystack_lower: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return false;
    }
    if phrase.len() <= 3 && phrase.chars().all(|c| c.is_ascii_alphanumeric()) {
        haystack_lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| token == phrase)
    } else {
        haystack_lower.contains(phrase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::MatchingConfig;

    fn item(id: &str, action: &str) -> ChecklistItem {
        ChecklistItem {
            id: id.to_string(),
            action: action.to_string(),
            importance: crate::blueprint::Importance::Standard,
            category: None,
            clinical_anchor: None,
            rationale: None,
            matching: None,
            competence_criteria: Default::default(),
        }
    }

    fn checklist() -> Vec<ChecklistItem> {
        vec![
            item("CA1", "Ensure scene safety"),
            item("CA2", "Apply high-flow oxygen"),
            item("CA3", "Administer salbutamol nebulizer"),
            item("CA4", "Check vital signs"),
            item("CA5", "Reassure the anxious patient"),
        ]
    }

    #[test]
    fn exact_id_wins() {
        let list = checklist();
        let m = find_checklist_match(Some("CA4"), "anything", &list, |_| false).expect("match");
        assert_eq!(m.item.id, "CA4");
        assert_eq!(m.confidence, MatchConfidence::Exact);
    }

    #[test]
    fn completed_items_do_not_match_again() {
        let list = checklist();
        assert!(find_checklist_match(Some("CA4"), "", &list, |id| id == "CA4").is_none());
        let m = find_checklist_match(None, "put the patient on oxygen", &list, |id| id == "CA2");
        assert!(m.is_none());
    }

    #[test]
    fn generic_words_do_not_match() {
        let list = checklist();
        assert!(find_checklist_match(None, "talk to the patient", &list, |_| false).is_none());
    }

    #[test]
    fn unknown_id_falls_back_to_text() {
        let list = checklist();
        let m = find_checklist_match(Some("CA99"), "Start a ventolin neb", &list, |_| false)
            .expect("match");
        assert_eq!(m.item.id, "CA3");
        assert_eq!(m.confidence, MatchConfidence::Medium);
        assert!(find_checklist_match(Some("CA99"), "wait and see", &list, |_| false).is_none());
    }

    #[test]
    fn default_families_match_synonyms() {
        let list = checklist();
        let m = find_checklist_match(None, "Start a ventolin neb", &list, |_| false)
            .expect("match");
        assert_eq!(m.item.id, "CA3");
        assert_eq!(m.matched_keyword.as_deref(), Some("ventolin"));

        let m = find_checklist_match(None, "Checking HR and BP", &list, |_| false).expect("match");
        assert_eq!(m.item.id, "CA4");
    }

    #[test]
    fn short_keywords_need_whole_words() {
        let list = checklist();
        // "three" contains "hr" but is not the token "hr".
        assert!(find_checklist_match(None, "count to three", &list, |_| false).is_none());
    }

    #[test]
    fn negation_blocks_match() {
        let list = checklist();
        assert!(find_checklist_match(None, "don't give oxygen yet", &list, |_| false).is_none());
        assert!(find_checklist_match(None, "no oxygen for now", &list, |_| false).is_none());
    }

    #[test]
    fn fallback_uses_significant_words() {
        let list = checklist();
        let m = find_checklist_match(None, "I reassure her calmly", &list, |_| false)
            .expect("match");
        assert_eq!(m.item.id, "CA5");
        assert_eq!(m.matched_keyword.as_deref(), Some("reassure"));
    }

    #[test]
    fn authored_keywords_take_priority() {
        let mut custom = item("CA9", "Give IM adrenaline");
        custom.matching = Some(MatchingConfig {
            keywords: vec!["EpiPen".into()],
            synonyms: vec![],
            tool_mappings: vec!["auto-injector".into()],
            exclusion_keywords: Some(vec!["hold".into()]),
        });
        let list = vec![custom];
        let m = find_checklist_match(None, "use the auto-injector", &list, |_| false)
            .expect("match");
        assert_eq!(m.confidence, MatchConfidence::High);
        assert!(find_checklist_match(None, "hold the epipen", &list, |_| false).is_none());
        // Custom exclusions replace the default list.
        assert!(find_checklist_match(None, "no time, epipen now", &list, |_| false).is_some());
    }
}
