//! In-process [`ChallengeStore`] for tests and local runs.
//!
//! Each store instance owns its data; nothing is global. A transaction takes
//! the subject's async lock, stages its writes, and applies them in one step
//! on commit. Dropping an uncommitted transaction leaves the data untouched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::{Mutex as SubjectLock, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    challenge::OtpChallenge,
    normalize_subject,
    store::{ChallengeStore, Subject, SubjectTxn},
    ItemStatus, Purpose,
};
use crate::email::EmailMessage;

#[derive(Clone, Debug)]
struct ItemRow {
    title: String,
    status: ItemStatus,
    claimant_email: Option<String>,
}

#[derive(Clone, Debug)]
struct GrantRow {
    email: String,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<Uuid, ItemRow>,
    /// email -> password hash
    accounts: HashMap<String, Option<String>>,
    challenges: HashMap<String, OtpChallenge>,
    grants: HashMap<Vec<u8>, GrantRow>,
    outbox: Vec<EmailMessage>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryChallengeStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<HashMap<String, Arc<SubjectLock<()>>>>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item row.
    #[must_use]
    pub fn with_item(
        self,
        id: Uuid,
        title: &str,
        status: ItemStatus,
        claimant_email: Option<&str>,
    ) -> Self {
        self.data().items.insert(
            id,
            ItemRow {
                title: title.to_string(),
                status,
                claimant_email: claimant_email.map(normalize_subject),
            },
        );
        self
    }

    /// Seed an account row without a password.
    #[must_use]
    pub fn with_account(self, email: &str) -> Self {
        self.data().accounts.insert(normalize_subject(email), None);
        self
    }

    /// Emails queued by committed transactions, oldest first.
    #[must_use]
    pub fn outbox(&self) -> Vec<EmailMessage> {
        self.data().outbox.clone()
    }

    /// Change an item's status, as the item service would.
    pub fn set_item_status(&self, id: Uuid, status: ItemStatus) {
        if let Some(item) = self.data().items.get_mut(&id) {
            item.status = status;
        }
    }

    #[must_use]
    pub fn item_status(&self, id: Uuid) -> Option<ItemStatus> {
        self.data().items.get(&id).map(|item| item.status)
    }

    #[must_use]
    pub fn password_hash(&self, email: &str) -> Option<String> {
        self.data()
            .accounts
            .get(&normalize_subject(email))
            .cloned()
            .flatten()
    }

    #[must_use]
    pub fn challenge(&self, subject_id: &str) -> Option<OtpChallenge> {
        self.data()
            .challenges
            .get(&normalize_subject(subject_id))
            .cloned()
    }

    fn data(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subject_lock(&self, subject_id: &str) -> Arc<SubjectLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(SubjectLock::new(())))
            .clone()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn begin(&self, subject_id: &str) -> Result<Box<dyn SubjectTxn>> {
        let subject_id = normalize_subject(subject_id);
        let guard = self.subject_lock(&subject_id).lock_owned().await;
        Ok(Box::new(MemoryTxn {
            subject_id,
            state: Arc::clone(&self.state),
            _guard: guard,
            staged: Staged::default(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Staged {
    challenge: Option<OtpChallenge>,
    emails: Vec<EmailMessage>,
    returned_items: Vec<Uuid>,
    new_grants: Vec<(Vec<u8>, DateTime<Utc>)>,
    consumed_grants: Vec<(Vec<u8>, DateTime<Utc>)>,
    password_hash: Option<String>,
}

struct MemoryTxn {
    subject_id: String,
    state: Arc<Mutex<MemoryState>>,
    _guard: OwnedMutexGuard<()>,
    staged: Staged,
}

impl MemoryTxn {
    fn data(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SubjectTxn for MemoryTxn {
    async fn load_subject(&mut self, purpose: Purpose) -> Result<Option<Subject>> {
        let data = self.data();
        let subject = match purpose {
            Purpose::ClaimReturn => Uuid::parse_str(&self.subject_id).ok().and_then(|id| {
                data.items.get(&id).map(|item| Subject::Item {
                    id,
                    title: item.title.clone(),
                    status: item.status,
                    claimant_email: item.claimant_email.clone(),
                })
            }),
            Purpose::PasswordReset => {
                data.accounts
                    .contains_key(&self.subject_id)
                    .then(|| Subject::Account {
                        email: self.subject_id.clone(),
                    })
            }
        };
        Ok(subject)
    }

    async fn load_challenge(&mut self) -> Result<Option<OtpChallenge>> {
        if let Some(staged) = &self.staged.challenge {
            return Ok(Some(staged.clone()));
        }
        Ok(self.data().challenges.get(&self.subject_id).cloned())
    }

    async fn save_challenge(&mut self, challenge: &OtpChallenge) -> Result<()> {
        self.staged.challenge = Some(challenge.clone());
        Ok(())
    }

    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()> {
        self.staged.emails.push(message.clone());
        Ok(())
    }

    async fn mark_item_returned(&mut self, item_id: Uuid) -> Result<bool> {
        if self.staged.returned_items.contains(&item_id) {
            return Ok(false);
        }
        let claimed = self
            .data()
            .items
            .get(&item_id)
            .is_some_and(|item| item.status == ItemStatus::Claimed);
        if claimed {
            self.staged.returned_items.push(item_id);
        }
        Ok(claimed)
    }

    async fn insert_reset_grant(
        &mut self,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.staged.new_grants.push((token_hash.to_vec(), expires_at));
        Ok(())
    }

    async fn consume_reset_grant(
        &mut self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self
            .staged
            .consumed_grants
            .iter()
            .any(|(hash, _)| hash.as_slice() == token_hash)
        {
            return Ok(false);
        }

        let usable = self.data().grants.get(token_hash).is_some_and(|grant| {
            grant.email == self.subject_id && grant.consumed_at.is_none() && now < grant.expires_at
        });
        if usable {
            self.staged.consumed_grants.push((token_hash.to_vec(), now));
        }
        Ok(usable)
    }

    async fn set_password_hash(&mut self, password_hash: &str) -> Result<()> {
        self.staged.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            subject_id,
            state,
            _guard,
            staged,
        } = *self;
        let mut data = state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(challenge) = staged.challenge {
            data.challenges.insert(subject_id.clone(), challenge);
        }
        data.outbox.extend(staged.emails);
        for item_id in staged.returned_items {
            if let Some(item) = data.items.get_mut(&item_id) {
                item.status = ItemStatus::Returned;
            }
        }
        for (token_hash, expires_at) in staged.new_grants {
            data.grants.insert(
                token_hash,
                GrantRow {
                    email: subject_id.clone(),
                    expires_at,
                    consumed_at: None,
                },
            );
        }
        for (token_hash, consumed_at) in staged.consumed_grants {
            if let Some(grant) = data.grants.get_mut(&token_hash) {
                grant.consumed_at = Some(consumed_at);
            }
        }
        if let Some(password_hash) = staged.password_hash {
            if let Some(account) = data.accounts.get_mut(&subject_id) {
                *account = Some(password_hash);
            }
        }
        Ok(())
    }
}
