//! Intent classification.
//!
//! Turns a free-text request into an [`Intent`]: an entity type, a cleaned
//! identifier, an action and a confidence. Classification is deterministic,
//! side-effect free and total; anything unrecognised becomes an `any` search
//! for the original text.

use snowline_core::{EntityType, Intent, IntentAction};
use std::sync::LazyLock;

/// Keyword phrase to entity type. Within a phrase length, earlier entries win.
const TYPE_PHRASES: &[(&str, &str)] = &[
    // Portal and UI artifacts
    ("service portal widget", "widget"),
    ("portal widget", "widget"),
    ("widget", "widget"),
    ("portal page", "portal_page"),
    ("service portal", "portal"),
    ("portal theme", "portal_theme"),
    ("theme", "portal_theme"),
    ("header footer", "header_footer"),
    ("angular provider", "angular_provider"),
    ("ng template", "ng_template"),
    ("widget dependency", "widget_dependency"),
    ("portal", "portal"),
    // Process automation
    ("flow designer flow", "flow"),
    ("flow action", "flow_action"),
    ("sub flow", "subflow"),
    ("subflow", "subflow"),
    ("flow", "flow"),
    ("workflow", "workflow"),
    ("decision table", "decision_table"),
    ("playbook", "playbook"),
    // Server and client logic
    ("catalog client script", "catalog_client_script"),
    ("catalog ui policy", "catalog_ui_policy"),
    ("script include", "script_include"),
    ("business rule", "business_rule"),
    ("client script", "client_script"),
    ("ui action", "ui_action"),
    ("ui policy action", "ui_policy_action"),
    ("ui policy", "ui_policy"),
    ("ui page", "ui_page"),
    ("ui script", "ui_script"),
    ("ui macro", "ui_macro"),
    ("fix script", "fix_script"),
    ("scheduled job", "scheduled_job"),
    ("scheduled script", "scheduled_job"),
    ("script action", "script_action"),
    ("processor", "processor"),
    ("access control", "acl"),
    ("acl", "acl"),
    // Data model
    ("dictionary entry", "dictionary"),
    ("dictionary", "dictionary"),
    ("choice list", "choice"),
    ("system property", "system_property"),
    ("property", "system_property"),
    ("list layout", "list_layout"),
    ("form section", "form_section"),
    ("table", "table"),
    // Applications and navigation
    ("scoped application", "application"),
    ("scoped app", "application"),
    ("application menu", "application_menu"),
    ("application", "application"),
    ("app", "application"),
    ("update set", "update_set"),
    ("module", "module"),
    ("scope", "scope"),
    // Integration
    ("scripted rest api", "scripted_rest_api"),
    ("scripted rest resource", "scripted_rest_resource"),
    ("rest api", "scripted_rest_api"),
    ("rest message", "rest_message"),
    ("soap message", "soap_message"),
    ("transform map", "transform_map"),
    ("data source", "data_source"),
    ("import set", "import_set"),
    ("mid server", "mid_server"),
    // Notifications and events
    ("inbound email action", "inbound_email_action"),
    ("email template", "email_template"),
    ("notification", "notification"),
    ("event", "event"),
    // Service catalog
    ("catalog item", "catalog_item"),
    ("record producer", "record_producer"),
    ("catalog variable", "catalog_variable"),
    ("variable set", "variable_set"),
    ("catalog category", "catalog_category"),
    // Reporting
    ("performance analytics indicator", "pa_indicator"),
    ("indicator", "pa_indicator"),
    ("report", "report"),
    ("dashboard", "dashboard"),
    // Knowledge and service management
    ("knowledge article", "knowledge_article"),
    ("knowledge base", "knowledge_base"),
    ("article", "knowledge_article"),
    ("assignment rule", "assignment_rule"),
    ("sla", "sla"),
    ("change request", "change_request"),
    ("configuration item", "configuration_item"),
    ("incident", "incident"),
    ("problem", "problem"),
    // Security and users
    ("role", "role"),
    ("group", "group"),
    ("user", "user"),
    // Conversational and test automation
    ("virtual agent topic", "virtual_agent_topic"),
    ("atf test", "atf_test"),
    ("test suite", "atf_suite"),
];

/// Words dropped from identifiers regardless of type.
const STOP_WORDS: &[&str] = &[
    "a", "add", "adjust", "all", "an", "and", "any", "artifact", "build", "called", "can", "change",
    "clone", "copy", "could", "create", "display", "duplicate", "edit", "every", "find", "fix",
    "for", "fork", "generate", "get", "i", "id", "in", "is", "it", "list", "locate", "look",
    "lookup", "make", "me", "modify", "my", "named", "need", "new", "of", "on", "open", "our",
    "please", "record", "script", "search", "show", "some", "sys_id", "that", "the", "this",
    "titled", "to", "tweak", "up", "update", "want", "what", "where", "which", "with", "you",
];

/// Action verbs; the first one found in the request decides the action.
const ACTION_VERBS: &[(&str, IntentAction)] = &[
    ("edit", IntentAction::Edit),
    ("modify", IntentAction::Edit),
    ("update", IntentAction::Edit),
    ("change", IntentAction::Edit),
    ("fix", IntentAction::Edit),
    ("tweak", IntentAction::Edit),
    ("adjust", IntentAction::Edit),
    ("create", IntentAction::Create),
    ("new", IntentAction::Create),
    ("make", IntentAction::Create),
    ("build", IntentAction::Create),
    ("add", IntentAction::Create),
    ("generate", IntentAction::Create),
    ("clone", IntentAction::Clone),
    ("copy", IntentAction::Clone),
    ("duplicate", IntentAction::Clone),
    ("fork", IntentAction::Clone),
];

/// Words that, directly followed by `all`/`every`, mark an enumeration request.
const LISTING_VERBS: &[&str] = &["list", "show", "get", "display", "find"];

/// Identifiers shorter than this fall back to a less aggressive cleaning.
const MIN_IDENTIFIER_LEN: usize = 2;

const ID_TOKEN_CONFIDENCE: f32 = 0.95;
const PHRASE_CONFIDENCE: f32 = 0.9;
const KEYWORD_CONFIDENCE: f32 = 0.75;
const UNTYPED_QUOTED_CONFIDENCE: f32 = 0.6;
const UNTYPED_CONFIDENCE: f32 = 0.3;

static DEFAULT_CLASSIFIER: LazyLock<IntentClassifier> = LazyLock::new(IntentClassifier::new);

/// Classify with the built-in phrase table.
pub fn classify(query: &str) -> Intent {
    DEFAULT_CLASSIFIER.classify(query)
}

/// Whether a token is a record id: exactly 32 hex digits.
pub fn is_id_token(token: &str) -> bool {
    token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone)]
struct Phrase {
    words: Vec<String>,
    entity_type: EntityType,
}

/// Rule-based classifier over an ordered phrase table.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    /// Longest phrases first; ties keep table order.
    phrases: Vec<Phrase>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let mut phrases: Vec<Phrase> = TYPE_PHRASES
            .iter()
            .map(|(phrase, tag)| Phrase {
                words: phrase.split_whitespace().map(str::to_string).collect(),
                entity_type: EntityType::new(tag),
            })
            .collect();

        // Raw tags ("script_include") are accepted as single-word keywords.
        let raw_tags: Vec<Phrase> = phrases
            .iter()
            .map(|p| p.entity_type.clone())
            .filter(|t| t.as_str().contains('_'))
            .map(|t| Phrase {
                words: vec![t.as_str().to_string()],
                entity_type: t,
            })
            .collect();
        for tag in raw_tags {
            if !phrases.iter().any(|p| p.words == tag.words) {
                phrases.push(tag);
            }
        }

        phrases.sort_by_key(|p| std::cmp::Reverse(p.words.len()));
        Self { phrases }
    }

    /// Every entity type the classifier can emit.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.phrases.iter().map(|p| &p.entity_type)
    }

    pub fn classify(&self, query: &str) -> Intent {
        let tokens = tokenize(query);
        let matched = self.detect_type(&tokens);
        let action = detect_action(&tokens, matched.as_ref().map(|m| &m.positions));
        let list_all = detect_listing(&tokens);

        let (entity_type, type_confidence) = match &matched {
            Some(m) if m.word_count > 1 => (m.entity_type.clone(), PHRASE_CONFIDENCE),
            Some(m) => (m.entity_type.clone(), KEYWORD_CONFIDENCE),
            None => (EntityType::any(), UNTYPED_CONFIDENCE),
        };

        let mut intent = Intent::new(entity_type, String::new())
            .with_action(action)
            .with_confidence(type_confidence);
        intent.list_all = list_all;

        if let Some(id) = tokens.iter().find(|t| is_id_token(&t.normalized)) {
            intent.identifier = id.normalized.clone();
            intent.list_all = false;
            return intent.with_confidence(ID_TOKEN_CONFIDENCE);
        }

        if let Some(quoted) = quoted_name(query) {
            intent.identifier = quoted;
            intent.list_all = false;
            if matched.is_none() {
                return intent.with_confidence(UNTYPED_QUOTED_CONFIDENCE);
            }
            return intent;
        }

        let matched_positions = matched.as_ref().map(|m| m.positions.as_slice()).unwrap_or(&[]);
        intent.identifier = self.clean_identifier(query, &tokens, matched_positions, list_all);
        intent
    }

    /// The cleaned identifier of a request, without classifying it.
    pub fn extract_identifier(&self, query: &str) -> String {
        self.classify(query).identifier
    }

    fn detect_type(&self, tokens: &[Token]) -> Option<TypeMatch> {
        self.phrases.iter().find_map(|phrase| {
            let positions = phrase_positions(tokens, &phrase.words);
            (!positions.is_empty()).then(|| TypeMatch {
                entity_type: phrase.entity_type.clone(),
                word_count: phrase.words.len(),
                positions,
            })
        })
    }

    /// Strip every type keyword and stop word. If that leaves (almost)
    /// nothing, the original request is used as is; listing requests may
    /// legitimately end up empty.
    fn clean_identifier(
        &self,
        query: &str,
        tokens: &[Token],
        matched_positions: &[usize],
        list_all: bool,
    ) -> String {
        let cleaned = tokens
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                !matched_positions.contains(i)
                    && !STOP_WORDS.contains(&t.normalized.as_str())
                    && !self.is_keyword(&t.normalized)
            })
            .map(|(_, t)| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if cleaned.chars().count() >= MIN_IDENTIFIER_LEN {
            cleaned
        } else if list_all {
            String::new()
        } else {
            query.trim().to_string()
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        self.phrases
            .iter()
            .any(|p| p.words.iter().any(|w| word_matches(word, w)))
    }
}

#[derive(Debug)]
struct TypeMatch {
    entity_type: EntityType,
    word_count: usize,
    /// Token positions covered by every occurrence of the phrase.
    positions: Vec<usize>,
}

#[derive(Debug)]
struct Token {
    /// Original text with surrounding punctuation removed.
    text: String,
    /// Lowercased `text`.
    normalized: String,
}

fn tokenize(query: &str) -> Vec<Token> {
    query
        .split_whitespace()
        .map(|raw| raw.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')))
        .map(strip_clitic)
        .filter(|t| !t.is_empty())
        .map(|t| Token {
            text: t.to_string(),
            normalized: t.to_lowercase(),
        })
        .collect()
}

/// Drops a possessive or contracted `'s` ("Bob's", "that's").
fn strip_clitic(token: &str) -> &str {
    ["'s", "\u{2019}s", "'S"]
        .iter()
        .find_map(|suffix| token.strip_suffix(suffix))
        .unwrap_or(token)
}

/// Plural forms match their singular keyword.
fn word_matches(token: &str, keyword: &str) -> bool {
    token == keyword
        || token
            .strip_suffix('s')
            .is_some_and(|t| t == keyword || t.strip_suffix('e') == Some(keyword))
}

fn phrase_positions(tokens: &[Token], words: &[String]) -> Vec<usize> {
    if words.is_empty() || tokens.len() < words.len() {
        return Vec::new();
    }
    let mut positions = Vec::new();
    for start in 0..=tokens.len() - words.len() {
        let window = &tokens[start..start + words.len()];
        if window
            .iter()
            .zip(words)
            .all(|(t, w)| word_matches(&t.normalized, w))
        {
            positions.extend(start..start + words.len());
        }
    }
    positions
}

fn detect_action(tokens: &[Token], type_positions: Option<&Vec<usize>>) -> IntentAction {
    tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| type_positions.is_none_or(|p| !p.contains(i)))
        .find_map(|(_, t)| {
            ACTION_VERBS
                .iter()
                .find(|(verb, _)| *verb == t.normalized)
                .map(|(_, action)| *action)
        })
        .unwrap_or_default()
}

fn detect_listing(tokens: &[Token]) -> bool {
    tokens.windows(2).any(|pair| {
        LISTING_VERBS.contains(&pair[0].normalized.as_str())
            && matches!(pair[1].normalized.as_str(), "all" | "every")
    })
}

/// Text between the first pair of matching quotes, if non-empty.
///
/// Single quotes only count at word boundaries, so apostrophes inside
/// words ("Bob's", "don't") never open or close a name.
fn quoted_name(query: &str) -> Option<String> {
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        let Some(start) = query.find(open) else {
            continue;
        };
        let rest = &query[start + open.len_utf8()..];
        if let Some(end) = rest.find(close) {
            let name = rest[..end].trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    single_quoted_name(query)
}

fn single_quoted_name(query: &str) -> Option<String> {
    let chars: Vec<(usize, char)> = query.char_indices().collect();
    let is_quote = |i: usize| matches!(chars[i].1, '\'' | '\u{2018}' | '\u{2019}');
    let opens = |i: usize| is_quote(i) && (i == 0 || chars[i - 1].1.is_whitespace());
    let closes = |i: usize| {
        is_quote(i)
            && chars
                .get(i + 1)
                .is_none_or(|(_, next)| next.is_whitespace() || next.is_ascii_punctuation())
    };

    let start = (0..chars.len()).find(|&i| opens(i))?;
    let end = (start + 1..chars.len()).find(|&i| closes(i))?;
    let name = query[chars[start].0 + chars[start].1.len_utf8()..chars[end].0].trim();
    (!name.is_empty()).then(|| name.to_string())
}
