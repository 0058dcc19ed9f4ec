// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PPD-style option tables and choice marking.
//!
//! Each printer carries an [`OptionTable`]: the declared options, their
//! choices, and which choice is currently "marked" (active). Marking applies
//! the implicit couplings between page-size, input-slot and manual-feed
//! options, and understands custom choices (`Custom.…` or `{…}`) with typed
//! parameters.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Points per unit for custom length values; the canonical unit is 1/72 inch.
fn unit_to_points(unit: &str) -> Option<f64> {
    match unit {
        "" | "pt" => Some(1.0),
        "in" => Some(72.0),
        "ft" => Some(864.0),
        "cm" => Some(72.0 / 2.54),
        "mm" => Some(72.0 / 25.4),
        "m" => Some(72.0 / 0.0254),
        _ => None,
    }
}

/// Declared type of one custom-choice parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CustomParamType {
    Int,
    Real,
    /// Length; accepts a unit suffix and normalizes to points
    Points,
    Text,
}

/// One parameter a custom choice can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomParam {
    pub name: SmolStr,
    pub kind: CustomParamType,
}

/// A parsed custom-choice parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomValue {
    Int(i64),
    Real(f64),
    Text(String),
}

/// One selectable choice of an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub name: SmolStr,
    /// Human-readable text; falls back to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Choice {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self { name: name.into(), text: None }
    }
}

/// A declared option: keyword, choices, default, and current mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpdOption {
    pub keyword: SmolStr,
    pub default_choice: SmolStr,
    pub choices: Vec<Choice>,
    /// Installable-options group members never participate in resolution
    #[serde(default)]
    pub installable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_params: Vec<CustomParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked: Option<SmolStr>,
    /// Parsed parameters of the marked custom choice, if any
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom_values: IndexMap<SmolStr, CustomValue>,
}

impl PpdOption {
    pub fn new(keyword: impl Into<SmolStr>, default_choice: impl Into<SmolStr>) -> Self {
        Self {
            keyword: keyword.into(),
            default_choice: default_choice.into(),
            choices: Vec::new(),
            installable: false,
            custom_params: Vec::new(),
            marked: None,
            custom_values: IndexMap::new(),
        }
    }

    crate::setters! {
        set {
            installable: bool,
            choices: Vec<Choice>,
            custom_params: Vec<CustomParam>,
        }
    }

    pub fn choice(mut self, name: impl Into<SmolStr>) -> Self {
        self.choices.push(Choice::new(name));
        self
    }

    /// The marked choice, falling back to the default.
    pub fn effective_choice(&self) -> &SmolStr {
        self.marked.as_ref().unwrap_or(&self.default_choice)
    }

    pub fn has_choice(&self, name: &str) -> bool {
        self.choices.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// True for `Custom.…` and `{…}` choice spellings.
pub fn is_custom_choice(choice: &str) -> bool {
    choice.len() > 7 && choice.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("Custom."))
        || (choice.starts_with('{') && choice.ends_with('}'))
}

/// Errors raised while marking a choice.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MarkError {
    #[error("option {option} has no custom parameters")]
    NotCustomizable { option: SmolStr },
    #[error("bad custom value {value:?} for parameter {param}")]
    BadCustomValue { param: SmolStr, value: String },
    #[error("unknown custom parameter {0}")]
    UnknownParam(SmolStr),
}

/// The per-printer option set, keyed case-insensitively by keyword.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionTable {
    options: IndexMap<SmolStr, PpdOption>,
}

impl OptionTable {
    pub fn insert(&mut self, option: PpdOption) {
        self.options.insert(lower(&option.keyword), option);
    }

    pub fn get(&self, keyword: &str) -> Option<&PpdOption> {
        self.options.get(&lower(keyword))
    }

    pub fn get_mut(&mut self, keyword: &str) -> Option<&mut PpdOption> {
        self.options.get_mut(&lower(keyword))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PpdOption> {
        self.options.values()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// The marked (or default) choice for an option, if declared.
    pub fn marked_choice(&self, keyword: &str) -> Option<&SmolStr> {
        self.get(keyword).map(PpdOption::effective_choice)
    }

    /// Whether `choice` is currently marked for `keyword`.
    pub fn is_marked(&self, keyword: &str, choice: &str) -> bool {
        self.marked_choice(keyword)
            .is_some_and(|c| c.eq_ignore_ascii_case(choice))
    }

    /// Mark `choice` for option `keyword`.
    ///
    /// Single-pick semantics: the previous mark on the option is replaced.
    /// Implicit couplings:
    /// - `PageSize` and `PageRegion` clear each other's marks;
    /// - `InputSlot` clears `ManualFeed`;
    /// - `ManualFeed=True` clears `InputSlot`;
    /// - `AP_D_InputSlot` clears `InputSlot`.
    ///
    /// Unknown options are ignored, matching the tolerant behavior printer
    /// drivers rely on.
    pub fn mark(&mut self, keyword: &str, choice: &str) -> Result<(), MarkError> {
        if self.get(keyword).is_none() {
            return Ok(());
        }

        // Validate custom values before touching any marks so a bad custom
        // spelling leaves the table unchanged.
        let custom = is_custom_choice(choice);
        let parsed = if custom {
            let option = self.get(keyword).ok_or(MarkError::UnknownParam(lower(keyword)))?;
            Some(parse_custom(option, choice)?)
        } else {
            None
        };

        if keyword.eq_ignore_ascii_case("PageSize") {
            self.clear_mark("PageRegion");
        } else if keyword.eq_ignore_ascii_case("PageRegion") {
            self.clear_mark("PageSize");
        } else if keyword.eq_ignore_ascii_case("InputSlot") {
            self.clear_mark("ManualFeed");
        } else if keyword.eq_ignore_ascii_case("ManualFeed") && choice.eq_ignore_ascii_case("True")
        {
            self.clear_mark("InputSlot");
        } else if keyword.eq_ignore_ascii_case("AP_D_InputSlot") {
            self.clear_mark("InputSlot");
        }

        if let Some(option) = self.get_mut(keyword) {
            option.marked = Some(SmolStr::new(choice));
            option.custom_values = parsed.unwrap_or_default();
        }
        Ok(())
    }

    pub fn clear_mark(&mut self, keyword: &str) {
        if let Some(option) = self.get_mut(keyword) {
            option.marked = None;
            option.custom_values = IndexMap::new();
        }
    }

    /// Marked page size, treating PageSize and PageRegion as one logical
    /// option: whichever carries an explicit mark wins, then PageSize's
    /// default.
    pub fn logical_page_size(&self) -> Option<&SmolStr> {
        if let Some(opt) = self.get("PageSize") {
            if opt.marked.is_some() {
                return opt.marked.as_ref();
            }
        }
        if let Some(opt) = self.get("PageRegion") {
            if opt.marked.is_some() {
                return opt.marked.as_ref();
            }
        }
        self.get("PageSize").map(PpdOption::effective_choice)
    }
}

/// Parse a custom choice's parameters against the option's declarations.
fn parse_custom(
    option: &PpdOption,
    choice: &str,
) -> Result<IndexMap<SmolStr, CustomValue>, MarkError> {
    if option.custom_params.is_empty() {
        return Err(MarkError::NotCustomizable { option: option.keyword.clone() });
    }

    let mut values = IndexMap::new();
    if let Some(rest) = strip_custom_prefix(choice) {
        // Single-parameter form: Custom.VALUE
        let param = &option.custom_params[0];
        values.insert(param.name.clone(), parse_value(param, rest)?);
    } else {
        // Brace form: {Name=Value Name2=Value2}
        let inner = &choice[1..choice.len() - 1];
        for pair in inner.split_whitespace() {
            let (name, raw) = pair.split_once('=').ok_or_else(|| MarkError::BadCustomValue {
                param: option.keyword.clone(),
                value: pair.to_string(),
            })?;
            let param = option
                .custom_params
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| MarkError::UnknownParam(SmolStr::new(name)))?;
            values.insert(param.name.clone(), parse_value(param, raw)?);
        }
    }
    Ok(values)
}

fn strip_custom_prefix(choice: &str) -> Option<&str> {
    if choice.len() > 7 && choice.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("Custom.")) {
        choice.get(7..)
    } else {
        None
    }
}

fn parse_value(param: &CustomParam, raw: &str) -> Result<CustomValue, MarkError> {
    let bad = || MarkError::BadCustomValue { param: param.name.clone(), value: raw.to_string() };
    match param.kind {
        CustomParamType::Int => raw.parse::<i64>().map(CustomValue::Int).map_err(|_| bad()),
        CustomParamType::Real => raw.parse::<f64>().map(CustomValue::Real).map_err(|_| bad()),
        CustomParamType::Points => {
            let split = raw
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(raw.len());
            let number: f64 = raw[..split].parse().map_err(|_| bad())?;
            let factor = unit_to_points(&raw[split..]).ok_or_else(bad)?;
            Ok(CustomValue::Real(number * factor))
        }
        CustomParamType::Text => Ok(CustomValue::Text(raw.to_string())),
    }
}

fn lower(s: &str) -> SmolStr {
    SmolStr::new(s.to_ascii_lowercase())
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
