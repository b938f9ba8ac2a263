//! Textual encodings for tags inserted into comma-separated prompt fields
//!
//! A tag value can sit in a buffer in one of four shapes:
//! - Bare: `value`
//! - Trailing: `value, `
//! - Leading: `, value`
//! - Padded: `, value, `
//!
//! [`choose_variant`] picks the shape that keeps the surrounding list well
//! formed for a given cursor position, and [`boundary`] finds encodings in a
//! buffer without matching inside longer tokens.

pub mod boundary;

pub use boundary::{find_bounded, is_boundary_char, joins_words};

use serde::{Deserialize, Serialize};

/// Separator placed between tags in a field.
pub const SEPARATOR: &str = ", ";

/// One of the four textual shapes a tag value can take in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Variant {
    /// `value`
    Bare,
    /// `value, `
    Trailing,
    /// `, value`
    Leading,
    /// `, value, `
    Padded,
}

impl Variant {
    /// All variants in index order (1..=4).
    pub const ALL: [Variant; 4] = [
        Variant::Bare,
        Variant::Trailing,
        Variant::Leading,
        Variant::Padded,
    ];

    /// Used when the cursor context does not favor any other shape.
    pub const DEFAULT: Variant = Variant::Trailing;

    /// 1-based index of this variant.
    pub fn index(self) -> u8 {
        match self {
            Variant::Bare => 1,
            Variant::Trailing => 2,
            Variant::Leading => 3,
            Variant::Padded => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Variant::Bare),
            2 => Some(Variant::Trailing),
            3 => Some(Variant::Leading),
            4 => Some(Variant::Padded),
            _ => None,
        }
    }

    /// Render `value` in this shape.
    pub fn render(self, value: &str) -> String {
        match self {
            Variant::Bare => value.to_string(),
            Variant::Trailing => format!("{}{}", value, SEPARATOR),
            Variant::Leading => format!("{}{}", SEPARATOR, value),
            Variant::Padded => format!("{}{}{}", SEPARATOR, value, SEPARATOR),
        }
    }

    /// Variants from most to least specific. Removal tries them in this order
    /// so that the separators around a tag go away together with it.
    pub fn removal_order() -> [Variant; 4] {
        [
            Variant::Padded,
            Variant::Leading,
            Variant::Trailing,
            Variant::Bare,
        ]
    }
}

/// A rendered tag value together with the shape it was rendered in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoding {
    pub variant: Variant,
    pub text: String,
}

impl Encoding {
    pub fn new(variant: Variant, value: &str) -> Self {
        Self {
            variant,
            text: variant.render(value),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Render all four encodings of `value`, in index order.
pub fn format_variants(value: &str) -> [Encoding; 4] {
    Variant::ALL.map(|variant| Encoding::new(variant, value))
}

/// What sits next to the cursor on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    /// Start/end of buffer or of a line
    Edge,
    /// A list separator (`,`)
    Separator,
    /// Grouping punctuation opening (left) or closing (right) a group
    Group,
    /// Anything else: the cursor touches another token
    Word,
}

fn classify(c: Option<char>, group_chars: &[char]) -> Side {
    match c {
        None | Some('\n') | Some('\r') => Side::Edge,
        Some(',') => Side::Separator,
        Some(c) if group_chars.contains(&c) => Side::Group,
        Some(_) => Side::Word,
    }
}

fn is_blank(c: &char) -> bool {
    *c == ' ' || *c == '\t'
}

fn left_side(text_before: &str) -> Side {
    let c = text_before.chars().rev().find(|c| !is_blank(c));
    classify(c, &['(', '[', '{', '<'])
}

fn right_side(text_after: &str) -> Side {
    let c = text_after.chars().find(|c| !is_blank(c));
    classify(c, &[')', ']', '}', '>'])
}

/// Pick the encoding shape for an insertion between `text_before` and
/// `text_after`.
pub fn choose_variant(text_before: &str, text_after: &str) -> Variant {
    match (left_side(text_before), right_side(text_after)) {
        (Side::Word, Side::Word) => Variant::Padded,
        (Side::Word, _) => Variant::Leading,
        (_, Side::Separator | Side::Group) => Variant::Bare,
        (Side::Group, Side::Edge) => Variant::Bare,
        _ => Variant::DEFAULT,
    }
}

/// 1-based form of [`choose_variant`].
pub fn choose_variant_index(text_before: &str, text_after: &str) -> u8 {
    choose_variant(text_before, text_after).index()
}
