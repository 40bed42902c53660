//! Keyword heuristic that guesses a strategy type from free text.
//!
//! Not authoritative: `None` means "ask the user", not an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy families the heuristic can recognise. Only some of them have a
/// registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    RsiReversal,
    Dca,
    MaCross,
    Macd,
    Bollinger,
}

impl StrategyKind {
    /// Detection priority, first match wins.
    pub const ALL: [StrategyKind; 6] = [
        Self::Grid,
        Self::RsiReversal,
        Self::Dca,
        Self::MaCross,
        Self::Macd,
        Self::Bollinger,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::RsiReversal => "rsi_reversal",
            Self::Dca => "dca",
            Self::MaCross => "ma_cross",
            Self::Macd => "macd",
            Self::Bollinger => "bollinger",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "grid" => Some(Self::Grid),
            "rsi_reversal" => Some(Self::RsiReversal),
            "dca" => Some(Self::Dca),
            "ma_cross" => Some(Self::MaCross),
            "macd" => Some(Self::Macd),
            "bollinger" => Some(Self::Bollinger),
            _ => None,
        }
    }

    /// Trigger terms, already lower-cased.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Grid => &["grid", "网格"],
            Self::RsiReversal => &["rsi", "超买", "超卖"],
            Self::Dca => &["dca", "定投"],
            Self::MaCross => &["ma", "ema", "sma", "moving average", "均线"],
            Self::Macd => &["macd"],
            Self::Bollinger => &["bollinger", "布林"],
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ASCII keywords this short are ambiguous inside longer words.
const SHORT_TERM_LEN: usize = 3;

/// Whether `keyword` occurs in `text`. Short ASCII keywords must not be
/// glued to other ASCII letters, so "ma" does not fire inside "macd" or
/// "small". Longer keywords match anywhere.
fn contains_term(text: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() || keyword.len() > SHORT_TERM_LEN {
        return text.contains(keyword);
    }
    let is_letter = |c: Option<char>| c.map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    text.match_indices(keyword).any(|(start, matched)| {
        let before = text[..start].chars().next_back();
        let after = text[start + matched.len()..].chars().next();
        !is_letter(before) && !is_letter(after)
    })
}

/// Guess the strategy type a user is asking for.
pub fn detect_strategy_type(input: &str) -> Option<StrategyKind> {
    let text = input.to_lowercase();
    StrategyKind::ALL
        .into_iter()
        .find(|kind| kind.keywords().iter().any(|kw| contains_term(&text, kw)))
}
