use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{EmailAddress, MailboxName};

/// Sender credentials exactly as they arrived in the request.
///
/// Validation is deliberately deferred: a bad sender must turn into a failed
/// entry in the report, not reject the whole dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderSpec {
    pub name: String,
    pub email: String,
    #[serde(alias = "password")]
    pub secret: SecretString,
}

/// A sender that passed validation and can be handed to the mail relay.
#[derive(Debug, Clone)]
pub struct SenderCredentials {
    pub name: MailboxName,
    pub email: EmailAddress,
    pub secret: SecretString,
}

impl SenderSpec {
    pub fn parse(&self) -> Result<SenderCredentials, String> {
        let name = MailboxName::parse(self.name.clone())?;
        let email = EmailAddress::parse(self.email.clone())?;
        if self.secret.expose_secret().is_empty() {
            return Err(format!("sender {} is missing a relay secret.", self.email));
        }
        Ok(SenderCredentials {
            name,
            email,
            secret: self.secret.clone(),
        })
    }
}
