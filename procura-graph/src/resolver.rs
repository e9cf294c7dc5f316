use std::sync::Arc;

use serde_json::json;

use procura_core::output_parsers::{labeled_value, parse_labeled_fields};
use procura_core::{ExtractionCapability, HierarchyLevel, HierarchyLookupCapability, Message};

use crate::prompts::{PromptSet, SystemMessages};
use crate::{HierarchyChoice, StepName, StepOutcome, WorkflowState, WorkflowStep};

pub const SKIP: &str = "skip";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Material,
    Location,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Material => "material",
            ItemKind::Location => "location",
        }
    }

    pub fn step(&self) -> StepName {
        match self {
            ItemKind::Material => StepName::MaterialResolver,
            ItemKind::Location => StepName::LocationResolver,
        }
    }

    pub fn for_step(step: StepName) -> Option<Self> {
        match step {
            StepName::MaterialResolver => Some(ItemKind::Material),
            StepName::LocationResolver => Some(ItemKind::Location),
            _ => None,
        }
    }

    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            ItemKind::Material => ("Material", "Hierarchy"),
            ItemKind::Location => ("location", "hierarchy"),
        }
    }

    pub fn item<'a>(&self, state: &'a WorkflowState) -> Option<&'a str> {
        match self {
            ItemKind::Material => state.material.as_deref(),
            ItemKind::Location => state.location.as_deref(),
        }
    }

    pub fn hierarchy<'a>(&self, state: &'a WorkflowState) -> Option<&'a HierarchyChoice> {
        match self {
            ItemKind::Material => state.material_hierarchy.as_ref(),
            ItemKind::Location => state.location_hierarchy.as_ref(),
        }
    }

    pub fn confirmation<'a>(&self, state: &'a WorkflowState) -> Option<&'a str> {
        match self {
            ItemKind::Material => state.material_confirmation.as_deref(),
            ItemKind::Location => state.location_confirmation.as_deref(),
        }
    }

    pub fn set_confirmation(&self, state: &mut WorkflowState, value: Option<String>) {
        match self {
            ItemKind::Material => state.material_confirmation = value,
            ItemKind::Location => state.location_confirmation = value,
        }
    }

    fn set_item(&self, state: &mut WorkflowState, item: Option<String>) {
        match self {
            ItemKind::Material => state.material = item,
            ItemKind::Location => state.location = item,
        }
    }

    fn set_hierarchy(&self, state: &mut WorkflowState, hierarchy: Option<HierarchyChoice>) {
        match self {
            ItemKind::Material => state.material_hierarchy = hierarchy,
            ItemKind::Location => state.location_hierarchy = hierarchy,
        }
    }
}

/// Material and location resolution share this step, parameterized by
/// [`ItemKind`] and the lookup function for that kind.
pub struct HierarchyResolver {
    kind: ItemKind,
    extraction: Option<Arc<dyn ExtractionCapability>>,
    lookup: Arc<dyn HierarchyLookupCapability>,
    prompts: PromptSet,
    messages: Arc<SystemMessages>,
}

impl HierarchyResolver {
    pub fn new(
        kind: ItemKind,
        extraction: Option<Arc<dyn ExtractionCapability>>,
        lookup: Arc<dyn HierarchyLookupCapability>,
    ) -> Self {
        Self {
            kind,
            extraction,
            lookup,
            prompts: PromptSet,
            messages: Arc::new(SystemMessages::default()),
        }
    }

    pub fn material(
        extraction: Option<Arc<dyn ExtractionCapability>>,
        lookup: Arc<dyn HierarchyLookupCapability>,
    ) -> Self {
        Self::new(ItemKind::Material, extraction, lookup)
    }

    pub fn location(
        extraction: Option<Arc<dyn ExtractionCapability>>,
        lookup: Arc<dyn HierarchyLookupCapability>,
    ) -> Self {
        Self::new(ItemKind::Location, extraction, lookup)
    }

    pub fn with_messages(mut self, messages: Arc<SystemMessages>) -> Self {
        self.messages = messages;
        self
    }

    fn render(&self, template: &str, item: &str, hierarchy: &str) -> String {
        SystemMessages::render(
            template,
            &[
                ("kind", self.kind.as_str()),
                ("item", item),
                ("hierarchy", hierarchy),
            ],
        )
    }

    fn extraction_prompt(&self, user_prompt: &str) -> String {
        match self.kind {
            ItemKind::Material => self.prompts.material_extraction(user_prompt),
            ItemKind::Location => self.prompts.location_extraction(user_prompt),
        }
    }

    /// Settles item and hierarchy, extends the combined prompt and records
    /// the step as run.
    fn finalize(
        &self,
        mut state: WorkflowState,
        item: Option<String>,
        hierarchy: Option<HierarchyChoice>,
        status: &str,
        log: String,
    ) -> StepOutcome {
        let mut combined = state
            .combined_prompt
            .clone()
            .unwrap_or_else(|| state.original_prompt.clone());
        let confirmed = hierarchy.as_ref().and_then(HierarchyChoice::confirmed);
        if let (Some(item), Some(level)) = (item.as_deref(), confirmed) {
            combined = format!("{combined}\nHierarchy level for {item}: '{level}'");
        }
        state.combined_prompt = Some(combined);

        let output = json!({
            "status": status,
            "item": item,
            "hierarchy": confirmed,
        });
        state.add_message(Message::assistant(log));
        self.kind.set_item(&mut state, item);
        self.kind.set_hierarchy(&mut state, hierarchy);
        self.kind.set_confirmation(&mut state, None);
        state.pending = None;
        state.record_output(self.kind.step(), output);
        StepOutcome::Continue(state)
    }

    fn unavailable(&self, state: WorkflowState) -> StepOutcome {
        let log = self.messages.extraction_unavailable.clone();
        self.finalize(state, None, None, "unavailable", log)
    }

    fn apply_confirmation(&self, state: WorkflowState, confirmation: &str) -> StepOutcome {
        let confirmation = confirmation.trim();
        if confirmation.eq_ignore_ascii_case(SKIP) {
            tracing::info!(kind = self.kind.as_str(), "hierarchy confirmation skipped");
            let log = self.render(&self.messages.hierarchy_skipped, "", "");
            return self.finalize(state, None, Some(HierarchyChoice::Skipped), "skipped", log);
        }

        let item = self.kind.item(&state).map(str::to_string);
        tracing::info!(
            kind = self.kind.as_str(),
            hierarchy = confirmation,
            "hierarchy confirmed by user"
        );
        let log = self.render(
            &self.messages.hierarchy_confirmed,
            item.as_deref().unwrap_or_default(),
            confirmation,
        );
        self.finalize(
            state,
            item,
            Some(HierarchyChoice::Confirmed(confirmation.to_string())),
            "confirmed",
            log,
        )
    }

    fn ask_for_hierarchy(
        &self,
        mut state: WorkflowState,
        item: String,
        level: &HierarchyLevel,
    ) -> StepOutcome {
        tracing::info!(
            kind = self.kind.as_str(),
            item = item.as_str(),
            lookup = %level,
            "hierarchy ambiguous, asking for clarification"
        );
        let template = match level {
            HierarchyLevel::Multiple => &self.messages.ambiguous_hierarchy,
            _ => &self.messages.unidentified_hierarchy,
        };
        let message = self.render(template, &item, "");
        state.add_message(Message::assistant(message.clone()));
        self.kind.set_item(&mut state, Some(item));
        StepOutcome::Suspend { state, message }
    }
}

#[async_trait::async_trait]
impl WorkflowStep for HierarchyResolver {
    fn name(&self) -> StepName {
        self.kind.step()
    }

    async fn run(&self, state: WorkflowState) -> StepOutcome {
        if let Some(confirmation) = self.kind.confirmation(&state).map(str::to_string) {
            return self.apply_confirmation(state, &confirmation);
        }

        let Some(extraction) = self.extraction.as_ref() else {
            tracing::warn!(kind = self.kind.as_str(), "extraction capability not configured");
            return self.unavailable(state);
        };

        let prompt = self.extraction_prompt(&state.original_prompt);
        let reply = match extraction.invoke(&prompt).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(kind = self.kind.as_str(), error = %error, "extraction failed");
                return self.unavailable(state);
            }
        };

        let (item_label, hierarchy_label) = self.kind.labels();
        let fields = parse_labeled_fields(&reply, &[item_label, hierarchy_label]);
        let item = labeled_value(&fields, item_label);
        let hierarchy = labeled_value(&fields, hierarchy_label);

        match (item, hierarchy) {
            (Some(item), Some(hierarchy)) => {
                let log = self.render(&self.messages.extraction_success, &item, &hierarchy);
                self.finalize(
                    state,
                    Some(item),
                    Some(HierarchyChoice::Confirmed(hierarchy)),
                    "resolved",
                    log,
                )
            }
            (Some(item), None) => match self.lookup.lookup(&item).await {
                HierarchyLevel::Level(level) => {
                    let log = self.render(&self.messages.hierarchy_resolved, &item, &level);
                    self.finalize(
                        state,
                        Some(item),
                        Some(HierarchyChoice::Confirmed(level)),
                        "resolved_from_lookup",
                        log,
                    )
                }
                ambiguous => self.ask_for_hierarchy(state, item, &ambiguous),
            },
            (None, _) => {
                let log = self.render(&self.messages.nothing_found, "", "");
                self.finalize(state, None, None, "not_found", log)
            }
        }
    }
}
