//! Per-recipient template variables and body rendering.

use std::collections::BTreeMap;

use parley_store::{Contact, VariableSource};

/// Variables to send to one recipient.
///
/// With [`VariableSource::Contact`] each value names a contact field (`name`,
/// `phone`, `email`) or a profile key; anything else is sent literally.
pub fn variables_for(
    source: VariableSource,
    template_variables: &BTreeMap<String, String>,
    contact: &Contact,
) -> BTreeMap<String, String> {
    match source {
        VariableSource::Static => template_variables.clone(),
        VariableSource::Contact => template_variables
            .iter()
            .map(|(key, field)| {
                let value = contact_field(contact, field).unwrap_or_else(|| field.clone());
                (key.clone(), value)
            })
            .collect(),
    }
}

/// A known field that is unset resolves to an empty string.
fn contact_field(contact: &Contact, field: &str) -> Option<String> {
    match field.trim() {
        "name" => Some(contact.name.clone().unwrap_or_default()),
        "phone" => Some(contact.phone.clone()),
        "email" => Some(contact.email.clone().unwrap_or_default()),
        other => contact.profile.get(other).cloned(),
    }
}

/// Replace `{{key}}` placeholders. Unknown placeholders are left as written.
pub fn render(body: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match variables.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
