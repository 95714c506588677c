use std::collections::BTreeMap;

use super::{EmailAddress, MailboxName};

/// A destination address plus whatever personalization fields the caller
/// supplied (location, role, company, ...).
#[derive(Debug, Clone)]
pub struct Recipient {
    pub email: EmailAddress,
    pub name: Option<MailboxName>,
    pub fields: BTreeMap<String, String>,
}

impl Recipient {
    /// The explicit placeholder-name -> value mapping used for template
    /// substitution. Only fields that are actually present appear here, so a
    /// `{role}` placeholder survives verbatim for a recipient without a role.
    pub fn substitutions(&self) -> Vec<(&str, &str)> {
        let mut fields = Vec::with_capacity(2 + self.fields.len());
        fields.push(("email", self.email.as_ref()));
        if let Some(name) = &self.name {
            fields.push(("name", name.as_ref()));
        }
        for (key, value) in &self.fields {
            fields.push((key.as_str(), value.as_str()));
        }
        fields
    }
}
