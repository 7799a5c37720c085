use std::collections::HashSet;

use {
    parley_common::Result,
    parley_store::{Contact, Store},
};

/// Contacts in any of `segment_ids`, each exactly once, in first-seen order.
pub async fn resolve_audience(store: &dyn Store, segment_ids: &[String]) -> Result<Vec<Contact>> {
    let contacts = store.contacts_in_segments(segment_ids).await?;
    Ok(dedupe(contacts))
}

pub fn dedupe(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen = HashSet::new();
    contacts
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}
