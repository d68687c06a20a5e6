use bson::Document;

use connstring::Host;
use error::Result;

/// Executes database commands against a single server on behalf of the
/// topology core. Wire-level encoding, connection pooling and authentication
/// all live behind this trait; the core only interprets reply documents.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` against `namespace` on the given host and returns the
    /// server's reply document.
    fn command(&self, host: &Host, namespace: &str, command: &Document) -> Result<Document>;
}
