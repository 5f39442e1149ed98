//! A narrow model of one HTML form and the page around it.
//!
//! Only what an edit needs is exposed: list elements matching a CSS selector,
//! read and write a named field, tick a checkbox, drop a field, and produce
//! the name/value pairs a browser would submit.

use crate::error::{ProtocolError, RequestError};
use log::debug;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use url::Url;

/// Owned snapshot of a matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub attrs: BTreeMap<String, String>,
}

impl Element {
    fn from_ref(el: ElementRef<'_>) -> Self {
        Element {
            attrs: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Value,
    Checkable { checked: bool },
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    id: Option<String>,
    value: String,
    kind: FieldKind,
}

impl Field {
    fn is_successful(&self) -> bool {
        match self.kind {
            FieldKind::Value => true,
            FieldKind::Checkable { checked } => checked,
        }
    }
}

/// An open form, ready to be filled in and submitted.
#[derive(Debug, Clone)]
pub struct ChangeForm {
    page_url: Url,
    action: String,
    document: Html,
    fields: Vec<Field>,
}

fn selector(css: &str) -> Result<Selector, ProtocolError> {
    Selector::parse(css).map_err(|_| ProtocolError::Selector(css.to_string()))
}

impl ChangeForm {
    /// Parses `html` (served from `page_url`) and opens the first form
    /// matching `form_selector`.
    pub fn parse(page_url: Url, html: &str, form_selector: &str) -> Result<Self, ProtocolError> {
        let document = Html::parse_document(html);
        let form_sel = selector(form_selector)?;
        let controls = selector("input, select, textarea")?;
        let options = selector("option")?;

        let (action, fields) = {
            let form = document
                .select(&form_sel)
                .next()
                .ok_or(ProtocolError::MissingForm)?;
            let action = form.value().attr("action").unwrap_or_default().to_string();

            let mut fields = Vec::new();
            for control in form.select(&controls) {
                collect_fields(control, &options, &mut fields);
            }
            (action, fields)
        };

        debug!(
            "opened form {:?} on {} with {} fields",
            form_selector,
            page_url,
            fields.len()
        );
        Ok(ChangeForm {
            page_url,
            action,
            document,
            fields,
        })
    }

    /// Lists every element of the page matching a CSS selector, in document
    /// order.
    pub fn select(&self, css: &str) -> Result<Vec<Element>, ProtocolError> {
        let sel = selector(css)?;
        Ok(self.document.select(&sel).map(Element::from_ref).collect())
    }

    /// Current value of a field that would be submitted.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.is_successful())
            .map(|f| f.value.as_str())
    }

    /// Whether the form has any control by this name, submitted or not.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Sets a field to a single value, adding it when the form lacks it.
    /// A checkbox that is set becomes checked.
    pub fn set(&mut self, name: &str, value: &str) {
        debug!("form field {} = {:?}", name, value);
        match self.fields.iter().position(|f| f.name == name) {
            Some(first) => {
                let field = &mut self.fields[first];
                field.value = value.to_string();
                if let FieldKind::Checkable { ref mut checked } = field.kind {
                    *checked = true;
                }
                let mut index = 0;
                self.fields.retain(|f| {
                    let keep = index == first || f.name != name;
                    index += 1;
                    keep
                });
            }
            None => self.fields.push(Field {
                name: name.to_string(),
                id: None,
                value: value.to_string(),
                kind: FieldKind::Value,
            }),
        }
    }

    /// Checks the checkbox whose name or id is `control`.
    pub fn check(&mut self, control: &str) -> Result<(), ProtocolError> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| {
                matches!(f.kind, FieldKind::Checkable { .. })
                    && (f.name == control || f.id.as_deref() == Some(control))
            })
            .ok_or_else(|| ProtocolError::UnknownControl(control.to_string()))?;
        debug!("form checkbox {} checked", field.name);
        field.kind = FieldKind::Checkable { checked: true };
        Ok(())
    }

    /// Drops every field with this name from the submission.
    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|f| f.name != name);
    }

    /// Name/value pairs in submission order.
    pub fn submission(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|f| f.is_successful())
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }

    /// Where the form posts to, resolved against the page it came from.
    pub fn action_url(&self) -> Result<Url, RequestError> {
        if self.action.is_empty() {
            return Ok(self.page_url.clone());
        }
        self.page_url
            .join(&self.action)
            .map_err(|source| RequestError::FormAction {
                action: self.action.clone(),
                source,
            })
    }
}

fn collect_fields(control: ElementRef<'_>, options: &Selector, fields: &mut Vec<Field>) {
    let el = control.value();
    let name = match el.attr("name") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return,
    };
    if el.attr("disabled").is_some() {
        return;
    }
    let id = el.attr("id").map(str::to_string);

    match el.name() {
        "input" => {
            let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "submit" | "button" | "image" | "reset" | "file" => {}
                "checkbox" | "radio" => fields.push(Field {
                    name,
                    id,
                    value: el.attr("value").unwrap_or("on").to_string(),
                    kind: FieldKind::Checkable {
                        checked: el.attr("checked").is_some(),
                    },
                }),
                _ => fields.push(Field {
                    name,
                    id,
                    value: el.attr("value").unwrap_or_default().to_string(),
                    kind: FieldKind::Value,
                }),
            }
        }
        "select" => {
            let multiple = el.attr("multiple").is_some();
            let all: Vec<ElementRef<'_>> = control.select(options).collect();
            let mut selected: Vec<ElementRef<'_>> = all
                .iter()
                .copied()
                .filter(|o| o.value().attr("selected").is_some())
                .collect();
            if selected.is_empty() && !multiple {
                selected.extend(all.first().copied());
            }
            if !multiple {
                selected.truncate(1);
            }
            for option in selected {
                let value = match option.value().attr("value") {
                    Some(v) => v.to_string(),
                    None => option.text().collect::<String>().trim().to_string(),
                };
                fields.push(Field {
                    name: name.clone(),
                    id: id.clone(),
                    value,
                    kind: FieldKind::Value,
                });
            }
        }
        "textarea" => fields.push(Field {
            name,
            id,
            value: control.text().collect(),
            kind: FieldKind::Value,
        }),
        _ => {}
    }
}
