use crate::error::{Result, WppError};
use crate::spreadsheet;
use crate::types::{BulkRecipient, PhoneNumber};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static MANUAL_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n,;]+").expect("valid separator regex"));

const TEMPLATE_ROWS: [[&str; 2]; 4] = [
    ["número", "mensagem"],
    ["5511999999999", "Olá João! Como você está?"],
    ["5511988888888", "Oi Maria, tudo bem?"],
    ["5511977777777", "Boa tarde Pedro! Lembre-se da reunião às 14h."],
];

/// Entry that failed phone validation, kept for operator correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidEntry {
    pub raw: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipientList {
    pub recipients: Vec<BulkRecipient>,
    pub invalid: Vec<InvalidEntry>,
    /// The source carried a message column.
    pub personalized: bool,
}

/// Case-folded header cell with diacritics and whitespace removed.
pub fn normalize_header(cell: &str) -> String {
    cell.nfd()
        .filter(|c| !is_combining_mark(*c) && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Blank cells count as absent; anything else is kept exactly as written.
fn non_blank(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

impl RecipientList {
    pub fn valid_count(&self) -> usize {
        self.recipients.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    pub fn personalized_count(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.is_personalized())
            .count()
    }

    pub fn fallback_count(&self) -> usize {
        self.valid_count() - self.personalized_count()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn numbers(&self) -> Vec<PhoneNumber> {
        self.recipients.iter().map(|r| r.number.clone()).collect()
    }

    /// Moves a corrected entry into the valid list. A value that still fails
    /// validation replaces the raw text and stays in the invalid list.
    pub fn correct_invalid(&mut self, index: usize, raw: &str) -> Result<&BulkRecipient> {
        if index >= self.invalid.len() {
            return Err(WppError::validation(format!("no invalid entry at {index}")));
        }
        match PhoneNumber::parse(raw) {
            Ok(number) => {
                let entry = self.invalid.remove(index);
                self.recipients.push(BulkRecipient::new(number, entry.message));
                Ok(&self.recipients[self.recipients.len() - 1])
            }
            Err(err) => {
                self.invalid[index].raw = raw.trim().to_string();
                Err(err)
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<BulkRecipient> {
        (index < self.recipients.len()).then(|| self.recipients.remove(index))
    }

    pub fn set_message(&mut self, index: usize, message: Option<String>) -> Result<()> {
        let recipient = self
            .recipients
            .get_mut(index)
            .ok_or_else(|| WppError::validation(format!("no recipient at {index}")))?;
        recipient.message = message.filter(|m| !m.trim().is_empty());
        Ok(())
    }
}

/// Builds a list from tabular rows: number in the first column, optional
/// message in the second when the header names it.
pub fn parse_rows(rows: &[Vec<String>]) -> RecipientList {
    let mut list = RecipientList::default();
    let Some(first) = rows.first() else {
        return list;
    };

    let has_header = first
        .first()
        .is_some_and(|cell| normalize_header(cell) == "numero");
    if has_header {
        list.personalized = first
            .get(1)
            .map(|cell| normalize_header(cell))
            .is_some_and(|h| h == "mensagem" || h == "message");
    }

    let body = if has_header { &rows[1..] } else { rows };
    for row in body {
        let Some(raw) = row.first().map(|c| c.trim()).filter(|c| !c.is_empty()) else {
            continue;
        };
        let message = if list.personalized {
            non_blank(row.get(1))
        } else {
            None
        };
        match PhoneNumber::parse(raw).ok() {
            Some(number) => list.recipients.push(BulkRecipient::new(number, message)),
            None => list.invalid.push(InvalidEntry {
                raw: raw.to_string(),
                message,
            }),
        }
    }
    list
}

/// Free text with numbers separated by newlines, commas or semicolons.
pub fn parse_text(text: &str) -> RecipientList {
    let mut list = RecipientList::default();
    for raw in MANUAL_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match PhoneNumber::parse(raw) {
            Ok(number) => list.recipients.push(BulkRecipient::new(number, None)),
            Err(_) => list.invalid.push(InvalidEntry {
                raw: raw.to_string(),
                message: None,
            }),
        }
    }
    list
}

pub fn load_file(path: &Path) -> Result<RecipientList> {
    let rows = spreadsheet::read_rows(path)?;
    let list = parse_rows(&rows);
    info!(
        "loaded {}: {} valid, {} invalid, {} personalized",
        path.display(),
        list.valid_count(),
        list.invalid_count(),
        list.personalized_count()
    );
    Ok(list)
}

pub fn template_rows() -> Vec<Vec<String>> {
    TEMPLATE_ROWS
        .iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect()
}

pub fn write_template(path: &Path) -> Result<()> {
    spreadsheet::write_rows(path, "Contatos", &template_rows())
}
