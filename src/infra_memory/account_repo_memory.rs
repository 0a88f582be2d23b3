use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Default)]
pub struct MemoryAccountRepo {
    by_id: DashMap<AccountId, Account>,
    id_by_email: DashMap<String, AccountId>,
}

impl MemoryAccountRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AccountRepo for MemoryAccountRepo {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        if self.by_id.contains_key(&account.id) {
            return Err(StoreError::ConstraintViolation("duplicate account id".into()));
        }
        match self.id_by_email.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::ConstraintViolation(
                "duplicate account email".into(),
            )),
            Entry::Vacant(slot) => {
                self.by_id.insert(account.id, account.clone());
                slot.insert(account.id);
                Ok(())
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let Some(id) = self.id_by_email.get(email).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }
}
