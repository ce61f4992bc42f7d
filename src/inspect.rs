//! Match / replace hooks applied to every relayed chunk
//!
//! - A [`Matcher`] sees each chunk for side effects only (counting and
//!   logging regex matches).
//! - A [`Replacer`] transforms each chunk before it is forwarded.
//!
//! Both are built from user supplied patterns. An invalid pattern disables
//! the feature instead of failing the process.

use regex::bytes::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::logger::Logger;

/// Inspection hook, invoked with every chunk read from either side
pub type Matcher = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Byte transform, invoked with every chunk before forwarding
pub type Replacer = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Separator between patterns and replacements in a replace list
pub const REPLACE_DELIMITER: char = '~';

/// One compiled `pattern~replacement` pair
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pub pattern: Regex,
    pub replacement: Vec<u8>,
}

impl ReplaceRule {
    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        self.pattern
            .replace_all(input, self.replacement.as_slice())
            .into_owned()
    }
}

/// Errors in a match or replace expression
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("invalid replace option: expected pattern~replacement pairs, got {0} parts")]
    UnpairedReplace(usize),
}

/// Parse `pattern~replacement[~pattern~replacement...]`
///
/// Rules are returned in declared order. Replacements may reference capture
/// groups as `$1` or `${name}`.
pub fn parse_replace_rules(list: &str) -> Result<Vec<ReplaceRule>, InspectError> {
    let parts: Vec<&str> = list.split(REPLACE_DELIMITER).collect();
    if parts.len() % 2 != 0 {
        return Err(InspectError::UnpairedReplace(parts.len()));
    }

    parts
        .chunks(2)
        .map(|pair| {
            Ok(ReplaceRule {
                pattern: Regex::new(pair[0])?,
                replacement: pair[1].as_bytes().to_vec(),
            })
        })
        .collect()
}

/// Build a matcher that logs every match with a process-wide sequence number
///
/// Returns `None` for an empty pattern, or (after a warning) for an invalid
/// one.
pub fn create_matcher(
    pattern: &str,
    match_counter: Arc<AtomicU64>,
    log: Arc<dyn Logger>,
) -> Option<Matcher> {
    if pattern.is_empty() {
        return None;
    }

    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            log.warn(format_args!("Invalid match regex: {}", e));
            return None;
        }
    };

    log.info(format_args!("Matching {}", re.as_str()));

    Some(Arc::new(move |input: &[u8]| {
        for m in re.find_iter(input) {
            let n = match_counter.fetch_add(1, Ordering::Relaxed) + 1;
            log.info(format_args!(
                "Match #{}: {}",
                n,
                String::from_utf8_lossy(m.as_bytes())
            ));
        }
    }))
}

/// Build a replacer applying every rule of `list` in order
///
/// Returns `None` for an empty list, or (after a warning) for a malformed
/// one.
pub fn create_replacer(list: &str, log: &dyn Logger) -> Option<Replacer> {
    if list.is_empty() {
        return None;
    }

    let rules = match parse_replace_rules(list) {
        Ok(rules) => rules,
        Err(e) => {
            log.warn(format_args!("Invalid replace option: {}", e));
            return None;
        }
    };

    for rule in &rules {
        log.info(format_args!(
            "Replacing {} with {}",
            rule.pattern.as_str(),
            String::from_utf8_lossy(&rule.replacement)
        ));
    }

    Some(Arc::new(move |input: &[u8]| {
        let mut out = input.to_vec();
        for rule in &rules {
            out = rule.apply(&out);
        }
        out
    }))
}
