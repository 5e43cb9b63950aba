use async_trait::async_trait;

use crate::db::StoreError;
use crate::models::automation::{Action, Automation, NewAutomation};
use crate::models::event::TriggerType;
use crate::models::workspace::WorkspaceId;

/// What a trigger lookup found. Automations whose stored rows cannot be
/// decoded are reported by id instead of failing the whole lookup.
#[derive(Debug, Default)]
pub struct TriggeredAutomations {
    pub automations: Vec<Automation>,
    pub unreadable: Vec<(String, StoreError)>,
}

/// Automations, triggers and actions. The engine only reads them; the write
/// methods exist for the surrounding CRUD layer and for seeding.
#[async_trait]
pub trait AutomationRepository: Send + Sync {
    /// Validates `automation` before anything is written.
    async fn create_automation(&self, automation: NewAutomation) -> Result<Automation, StoreError>;

    async fn set_automation_enabled(
        &self,
        workspace_id: &WorkspaceId,
        automation_id: &str,
        enabled: bool,
    ) -> Result<bool, StoreError>;

    /// Enabled automations of `workspace_id` with at least one trigger of
    /// `trigger_type`, actions included.
    async fn list_triggered_automations(
        &self,
        workspace_id: &WorkspaceId,
        trigger_type: TriggerType,
    ) -> Result<TriggeredAutomations, StoreError>;

    async fn find_action(
        &self,
        workspace_id: &WorkspaceId,
        action_id: &str,
    ) -> Result<Option<Action>, StoreError>;
}
