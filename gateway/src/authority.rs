//! Signing authority resolution.
//!
//! An account permission (`owner` or `active`) is a weighted threshold over
//! public keys and other accounts. The resolver collects every locally held
//! key that appears in the permission, following delegated accounts up to
//! [`MAX_DELEGATION_DEPTH`] levels below the signing account, until the
//! collected weight reaches the threshold.

use crate::{
    error::{Error, MissingKey, Result},
    keystore::KeyStore,
    node_api::NodeApi,
    objects::{is_object_id, Account},
};
use async_trait::async_trait;
use gph_crypto_keys::PrivateKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Delegation levels followed below the signing account.
pub const MAX_DELEGATION_DEPTH: usize = 2;

/// How long a fetched delegated account is reused.
const ACCOUNT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Permission level a transaction is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Owner,
    Active,
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Permission::Owner),
            "active" => Ok(Permission::Active),
            other => Err(Error::validation(format!(
                "permission must be owner or active, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Owner => write!(f, "owner"),
            Permission::Active => write!(f, "active"),
        }
    }
}

/// Where delegated accounts are fetched from.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Account by id or name; `None` if it does not exist.
    async fn account(&self, id_or_name: &str) -> Result<Option<Account>>;
}

#[async_trait]
impl AccountSource for NodeApi {
    async fn account(&self, id_or_name: &str) -> Result<Option<Account>> {
        if is_object_id(id_or_name) {
            self.get_object(id_or_name).await
        } else {
            self.get_account_by_name(id_or_name).await
        }
    }
}

/// Distinct private keys selected for signing.
#[derive(Debug, Clone, Default)]
pub struct SignerSet {
    keys: Vec<PrivateKey>,
}

impl SignerSet {
    /// Add `key` unless it is already present. Returns whether it was new.
    pub fn add(&mut self, key: PrivateKey) -> bool {
        let public = key.public_key();
        if self.keys.iter().any(|k| k.public_key() == public) {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn merge(&mut self, other: SignerSet) {
        for key in other.keys {
            self.add(key);
        }
    }

    pub fn keys(&self) -> &[PrivateKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// State of one walk over one permission.
struct ResolutionContext {
    threshold: u64,
    weight: u64,
    keys: SignerSet,
    visited: HashSet<String>,
    truncated: bool,
}

impl ResolutionContext {
    fn new(threshold: u32) -> Self {
        Self {
            threshold: u64::from(threshold),
            weight: 0,
            keys: SignerSet::default(),
            visited: HashSet::new(),
            truncated: false,
        }
    }

    fn satisfied(&self) -> bool {
        self.weight >= self.threshold
    }
}

pub struct AuthorityResolver {
    source: Arc<dyn AccountSource>,
    keys: KeyStore,
    prefix: String,
    accounts: Mutex<HashMap<String, (Instant, Account)>>,
}

impl AuthorityResolver {
    /// `prefix` is the chain's public key prefix used in authorities.
    pub fn new(source: Arc<dyn AccountSource>, keys: KeyStore, prefix: impl Into<String>) -> Self {
        Self {
            source,
            keys,
            prefix: prefix.into(),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Keys able to sign for `account` with `permission`.
    ///
    /// For `active`, keys satisfying `owner` are merged in as well, and the
    /// result is accepted when either authority reaches its threshold.
    pub async fn resolve_signers(&self, account: &Account, permission: Permission) -> Result<SignerSet> {
        let primary = self.collect(account, permission).await?;
        let mut satisfied = primary.satisfied();
        let mut truncated = primary.truncated;
        let (found, required) = (primary.weight, primary.threshold);
        let mut signers = primary.keys;

        if permission == Permission::Active {
            let owner = self.collect(account, Permission::Owner).await?;
            satisfied |= owner.satisfied();
            truncated |= owner.truncated;
            signers.merge(owner.keys);
        }

        debug!(
            "Resolved {} keys for {}@{} (weight {}/{})",
            signers.len(),
            account.name,
            permission,
            found,
            required
        );

        if signers.is_empty() {
            return Err(MissingKey::NoUsableKeys {
                account: account.name.clone(),
            }
            .into());
        }
        if !satisfied {
            let reason = if truncated {
                MissingKey::DepthExceeded {
                    account: account.name.clone(),
                }
            } else {
                MissingKey::InsufficientWeight {
                    account: account.name.clone(),
                    found,
                    required,
                }
            };
            return Err(reason.into());
        }
        Ok(signers)
    }

    async fn collect(&self, root: &Account, permission: Permission) -> Result<ResolutionContext> {
        let mut ctx = ResolutionContext::new(root.authority(permission).weight_threshold);
        let mut pending = Vec::new();
        self.visit(root, 0, permission, &mut ctx, &mut pending);

        while let Some((id, depth)) = pending.pop() {
            if ctx.satisfied() {
                break;
            }
            if ctx.visited.contains(&id) {
                continue;
            }
            match self.delegated_account(&id).await? {
                Some(account) => self.visit(&account, depth, permission, &mut ctx, &mut pending),
                None => warn!("Delegated account {} not found", id),
            }
        }
        Ok(ctx)
    }

    fn visit(
        &self,
        account: &Account,
        depth: usize,
        permission: Permission,
        ctx: &mut ResolutionContext,
        pending: &mut Vec<(String, usize)>,
    ) {
        if !ctx.visited.insert(account.id.clone()) {
            return;
        }

        let authority = account.authority(permission);
        for (key, weight) in &authority.key_auths {
            if let Some(private) = self.keys.find_prefixed(key, &self.prefix) {
                if ctx.keys.add(private.clone()) {
                    ctx.weight += u64::from(*weight);
                }
            }
        }

        if ctx.satisfied() || authority.account_auths.is_empty() {
            return;
        }
        if depth >= MAX_DELEGATION_DEPTH {
            ctx.truncated = true;
            return;
        }
        // Reversed so the stack pops delegates in listed order.
        for (delegate, _) in authority.account_auths.iter().rev() {
            if !ctx.visited.contains(delegate) {
                pending.push((delegate.clone(), depth + 1));
            }
        }
    }

    async fn delegated_account(&self, id: &str) -> Result<Option<Account>> {
        let cached = self
            .accounts
            .lock()
            .get(id)
            .filter(|(fetched, _)| fetched.elapsed() < ACCOUNT_CACHE_TTL)
            .map(|(_, account)| account.clone());
        if cached.is_some() {
            return Ok(cached);
        }

        let account = self.source.account(id).await?;
        if let Some(account) = &account {
            self.accounts
                .lock()
                .insert(id.to_string(), (Instant::now(), account.clone()));
        }
        Ok(account)
    }
}
