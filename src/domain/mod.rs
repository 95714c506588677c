mod email_address;
mod mailbox_name;
mod recipient;
mod sender;

pub use email_address::EmailAddress;
pub use mailbox_name::MailboxName;
pub use recipient::Recipient;
pub use sender::{SenderCredentials, SenderSpec};
