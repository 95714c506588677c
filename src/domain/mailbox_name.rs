use unicode_segmentation::UnicodeSegmentation;

/// Display name placed next to an address in a From/To mailbox header.
#[derive(Debug, Clone)]
pub struct MailboxName(String);

impl MailboxName {
    pub fn parse(s: String) -> Result<MailboxName, String> {
        let is_empty_or_whitespace = s.trim().is_empty();
        let is_too_long = s.graphemes(true).count() > 256;
        let forbidden_characters = ['/', '(', ')', '"', '<', '>', '\\', '{', '}'];
        let contains_forbidden_characters =
            s.chars().any(|c| forbidden_characters.contains(&c));

        if is_empty_or_whitespace || is_too_long || contains_forbidden_characters {
            Err(format!("{} is not a valid mailbox name.", s))
        } else {
            Ok(Self(s))
        }
    }
}

impl AsRef<str> for MailboxName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
