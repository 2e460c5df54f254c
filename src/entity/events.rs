use std::fmt;
use std::sync::Arc;

use crate::core::Result;
use crate::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BeforeSave,
    AfterSave,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeSave => "before save",
            Self::AfterSave => "after save",
            Self::BeforeInsert => "before insert",
            Self::AfterInsert => "after insert",
            Self::BeforeUpdate => "before update",
            Self::AfterUpdate => "after update",
            Self::BeforeDelete => "before delete",
            Self::AfterDelete => "after delete",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-class lifecycle callbacks. An error returned from a `before_*` hook
/// aborts the operation before storage is touched.
pub trait EntityHooks: Send + Sync {
    fn before_save(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_save(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn before_insert(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_insert(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn before_update(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn before_delete(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_delete(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }
}

impl dyn EntityHooks {
    pub(crate) fn dispatch(&self, event: LifecycleEvent, entity: &mut Entity) -> Result<()> {
        match event {
            LifecycleEvent::BeforeSave => self.before_save(entity),
            LifecycleEvent::AfterSave => self.after_save(entity),
            LifecycleEvent::BeforeInsert => self.before_insert(entity),
            LifecycleEvent::AfterInsert => self.after_insert(entity),
            LifecycleEvent::BeforeUpdate => self.before_update(entity),
            LifecycleEvent::AfterUpdate => self.after_update(entity),
            LifecycleEvent::BeforeDelete => self.before_delete(entity),
            LifecycleEvent::AfterDelete => self.after_delete(entity),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}

pub type Listener = Arc<dyn Fn(LifecycleEvent, &mut Entity) + Send + Sync>;

/// Ordered callback list. Used both per entity instance and per entity class.
#[derive(Clone, Default)]
pub struct Listeners {
    entries: Vec<(LifecycleEvent, Listener)>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: LifecycleEvent, listener: Listener) {
        self.entries.push((event, listener));
    }

    /// Remove the listeners of one event, or all of them.
    pub fn clear(&mut self, event: Option<LifecycleEvent>) {
        match event {
            Some(event) => self.entries.retain(|(e, _)| *e != event),
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call every listener registered for `event`, in registration order.
    /// Returns how many ran.
    pub fn fire(&self, event: LifecycleEvent, entity: &mut Entity) -> usize {
        let mut fired = 0;
        for (registered, listener) in &self.entries {
            if *registered == event {
                listener(event, entity);
                fired += 1;
            }
        }
        fired
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(event, _)| event))
            .finish()
    }
}
