//! Interactive scope selection as an explicit state machine.
//!
//! ```text
//! ChoosingMode ──► SelectingServices ──► Confirmed
//!      │       └─► SelectingScopes ────► Confirmed
//!      └──────────────(cancel / empty)──► Canceled
//! ```
//!
//! The list widget itself is a [`Picker`]; the selector only decides what
//! to ask, which items start selected, and where each answer leads.

use crate::model::RefreshTokenPayload;
use crate::registry::{AuthRegistry, RegistryError};

/// Presents a list and returns the chosen items, or `None` on cancel.
pub trait Picker: Send {
    fn select_one(&mut self, prompt: &str, options: &[String], default: usize) -> Option<usize>;

    fn select_many(
        &mut self,
        prompt: &str,
        options: &[String],
        preselected: &[bool],
    ) -> Option<Vec<usize>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    ByService,
    ByScope,
}

/// A confirmed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSelection {
    pub mode: SelectionMode,
    /// Empty in [`SelectionMode::ByScope`].
    pub services: Vec<String>,
    pub scopes: Vec<String>,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    ChoosingMode,
    SelectingServices,
    SelectingScopes,
    Canceled,
    Confirmed(ScopeSelection),
}

impl SelectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Confirmed(_))
    }
}

const MODES: [&str; 2] = ["By service", "By scope"];

pub struct ScopeSelector {
    registry: AuthRegistry,
    history: RefreshTokenPayload,
    readonly: bool,
    state: SelectionState,
}

impl ScopeSelector {
    /// Start a selection, preselecting what `history` recorded.
    pub fn new(registry: AuthRegistry, history: Option<RefreshTokenPayload>, readonly: bool) -> Self {
        let history = history.unwrap_or_default();
        Self {
            readonly: readonly || history.readonly,
            registry,
            history,
            state: SelectionState::ChoosingMode,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// Mode suggested by the previous login.
    pub fn default_mode(&self) -> SelectionMode {
        if !self.history.scopes.is_empty() && self.history.services.is_empty() {
            SelectionMode::ByScope
        } else {
            SelectionMode::ByService
        }
    }

    /// Advance one state. Terminal states are left as they are.
    pub fn step(&mut self, picker: &mut dyn Picker) -> Result<&SelectionState, RegistryError> {
        let next = match &self.state {
            SelectionState::ChoosingMode => {
                let options: Vec<String> = MODES.iter().map(|m| m.to_string()).collect();
                let default = match self.default_mode() {
                    SelectionMode::ByService => 0,
                    SelectionMode::ByScope => 1,
                };
                match picker.select_one("Select scopes", &options, default) {
                    Some(0) => SelectionState::SelectingServices,
                    Some(1) => SelectionState::SelectingScopes,
                    _ => SelectionState::Canceled,
                }
            }
            SelectionState::SelectingServices => {
                let options: Vec<String> = self
                    .registry
                    .list_user_oauth_services()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                let preselected = mark(&options, &self.history.services);

                match pick_many(picker, "Services to authorize", &options, &preselected) {
                    Some(services) => {
                        let scopes = self
                            .registry
                            .suggested_user_oauth_scopes_from_services(&services, self.readonly)?;
                        SelectionState::Confirmed(ScopeSelection {
                            mode: SelectionMode::ByService,
                            services,
                            scopes,
                            readonly: self.readonly,
                        })
                    }
                    None => SelectionState::Canceled,
                }
            }
            SelectionState::SelectingScopes => {
                let mut options = self.registry.all_user_scopes();
                for scope in &self.history.scopes {
                    if !options.contains(scope) {
                        options.push(scope.clone());
                    }
                }
                options.sort();
                let preselected = mark(&options, &self.history.scopes);

                match pick_many(picker, "Scopes to authorize", &options, &preselected) {
                    Some(scopes) => SelectionState::Confirmed(ScopeSelection {
                        mode: SelectionMode::ByScope,
                        services: Vec::new(),
                        scopes,
                        readonly: self.readonly,
                    }),
                    None => SelectionState::Canceled,
                }
            }
            SelectionState::Canceled | SelectionState::Confirmed(_) => return Ok(&self.state),
        };

        self.state = next;
        Ok(&self.state)
    }

    /// Step until a terminal state. `None` means the user canceled.
    pub fn run(mut self, picker: &mut dyn Picker) -> Result<Option<ScopeSelection>, RegistryError> {
        while !self.state.is_terminal() {
            self.step(picker)?;
        }
        Ok(match self.state {
            SelectionState::Confirmed(selection) => Some(selection),
            _ => None,
        })
    }
}

fn mark(options: &[String], chosen: &[String]) -> Vec<bool> {
    options.iter().map(|o| chosen.contains(o)).collect()
}

/// An empty selection counts as a cancel.
fn pick_many(
    picker: &mut dyn Picker,
    prompt: &str,
    options: &[String],
    preselected: &[bool],
) -> Option<Vec<String>> {
    let picked = picker.select_many(prompt, options, preselected)?;
    let items: Vec<String> = picked
        .into_iter()
        .filter_map(|i| options.get(i).cloned())
        .collect();
    (!items.is_empty()).then_some(items)
}
