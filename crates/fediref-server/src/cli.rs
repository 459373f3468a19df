use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fediref-server", about = "Remote account and status resolver")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/fediref.toml")]
    pub config: String,

    /// Local user on whose behalf remote requests are made
    #[arg(long, default_value = "")]
    pub requesting_user: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve an account by `user@domain` handle or URI and print it
    ResolveAccount {
        target: String,
        /// Refetch even when the stored copy is fresh
        #[arg(long)]
        force: bool,
    },
    /// Resolve a status by URI and print it
    ResolveStatus { uri: String },
    /// Re-sync an account's pinned statuses with its featured collection
    RefreshFeatured { handle: String },
    /// Refuse all dereferencing from a domain and its subdomains
    BlockDomain {
        domain: String,
        #[arg(long)]
        reason: Option<String>,
    },
    UnblockDomain { domain: String },
}

/// What a `resolve-account` target names.
#[derive(Debug, PartialEq, Eq)]
pub enum AccountTarget {
    Uri(String),
    Handle { username: String, domain: String },
}

impl AccountTarget {
    /// Accepts `https://…` URIs and `user@domain` handles, with or without a
    /// leading `@`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with("https://") || raw.starts_with("http://") {
            return Some(Self::Uri(raw.to_string()));
        }
        let handle = raw.strip_prefix('@').unwrap_or(raw);
        let (username, domain) = handle.split_once('@')?;
        if username.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self::Handle {
            username: username.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_parse_as_uri_or_handle() {
        assert_eq!(
            AccountTarget::parse("https://example.org/users/alice"),
            Some(AccountTarget::Uri("https://example.org/users/alice".to_string()))
        );
        let handle = AccountTarget::Handle {
            username: "alice".to_string(),
            domain: "example.org".to_string(),
        };
        assert_eq!(AccountTarget::parse("alice@Example.org").as_ref(), Some(&handle));
        assert_eq!(AccountTarget::parse("@alice@example.org").as_ref(), Some(&handle));
        assert_eq!(AccountTarget::parse("alice"), None);
        assert_eq!(AccountTarget::parse("@alice@"), None);
        assert_eq!(AccountTarget::parse("a@b@c"), None);
    }

    #[test]
    fn subcommands_parse() {
        let args = Args::parse_from(["fediref-server", "resolve-account", "--force", "alice@example.org"]);
        assert!(matches!(
            args.command,
            Command::ResolveAccount { force: true, .. }
        ));
        assert_eq!(args.config, "config/fediref.toml");

        let args = Args::parse_from([
            "fediref-server",
            "--config",
            "/etc/fediref.toml",
            "block-domain",
            "bad.example",
            "--reason",
            "spam",
        ]);
        assert_eq!(args.config, "/etc/fediref.toml");
        assert!(matches!(
            args.command,
            Command::BlockDomain { reason: Some(_), .. }
        ));
    }
}
