//! Per-command auth requirements.
//!
//! [`AuthRegistry`] is a read-only lookup over a compiled table mapping CLI
//! command paths to the services they touch, the token types they accept,
//! whether they need `offline_access`, and the OAuth scopes declared for
//! each service. No I/O.
//!
//! A path missing from the table yields `Ok(None)`: callers treat that as
//! "cannot explain", never as "no auth required".

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::model::TokenType;
use crate::user::scopes::relogin_command;

pub mod table;

pub use table::{CommandDecl, ServiceDecl};

/// Error type for registry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command path is empty")]
    EmptyCommandPath,

    #[error("unknown service '{name}' (known: {known})")]
    UnknownService { name: String, known: String },
}

/// Scopes declared for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceScopes {
    pub required_user_scopes: Vec<String>,
    pub suggested_readonly_scopes: Vec<String>,
    pub suggested_scopes: Vec<String>,
}

impl From<&ServiceDecl> for ServiceScopes {
    fn from(decl: &ServiceDecl) -> Self {
        fn owned(scopes: &[&str]) -> Vec<String> {
            scopes.iter().map(|s| s.to_string()).collect()
        }

        Self {
            required_user_scopes: owned(decl.required),
            suggested_readonly_scopes: owned(decl.suggested_readonly),
            suggested_scopes: owned(decl.suggested),
        }
    }
}

/// Compiled auth requirements of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequirement {
    pub command_path: String,
    pub services: Vec<String>,
    pub token_types: Vec<TokenType>,
    pub requires_offline: bool,
    /// Only services with a declaration appear here.
    pub service_scopes: BTreeMap<String, ServiceScopes>,
}

impl AuthRequirement {
    pub fn accepts(&self, token_type: TokenType) -> bool {
        self.token_types.contains(&token_type)
    }

    /// Union of the required user scopes of every service, sorted.
    pub fn required_user_scopes(&self) -> Vec<String> {
        self.service_scopes
            .values()
            .flat_map(|s| s.required_user_scopes.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Result of [`AuthRegistry::required_user_scopes_from_services_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicesReport {
    pub scopes: Vec<String>,
    /// Services without a declaration or with no required scopes.
    pub missing_declarations: Vec<String>,
}

/// What `auth explain` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub command: String,
    pub found: bool,
    pub services: Vec<String>,
    pub token_types: Vec<TokenType>,
    pub requires_offline: bool,
    pub required_user_scopes: Vec<String>,
    pub suggested_user_scopes: Vec<String>,
    pub missing_scope_declarations: Vec<String>,
    /// Empty when the command does not accept user tokens or is unknown.
    pub suggested_user_login_command: String,
}

/// Lookup over the service and command tables.
#[derive(Debug, Clone, Copy)]
pub struct AuthRegistry {
    services: &'static [ServiceDecl],
    commands: &'static [CommandDecl],
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AuthRegistry {
    /// Registry over the compiled table.
    pub fn builtin() -> Self {
        Self::from_tables(table::SERVICES, table::COMMANDS)
    }

    pub fn from_tables(
        services: &'static [ServiceDecl],
        commands: &'static [CommandDecl],
    ) -> Self {
        Self { services, commands }
    }

    fn service(&self, name: &str) -> Option<&'static ServiceDecl> {
        self.services.iter().find(|s| s.name == name)
    }

    fn command(&self, path: &str) -> Option<&'static CommandDecl> {
        self.commands.iter().find(|c| c.path == path)
    }

    /// Requirements of a command path, or `None` if the path is unknown.
    ///
    /// The path is matched after collapsing whitespace and lowercasing.
    pub fn requirements_for_command(
        &self,
        path: &str,
    ) -> Result<Option<AuthRequirement>, RegistryError> {
        let path = normalize_command_path(path);
        if path.is_empty() {
            return Err(RegistryError::EmptyCommandPath);
        }

        let Some(command) = self.command(&path) else {
            return Ok(None);
        };

        let service_scopes = command
            .services
            .iter()
            .filter_map(|name| {
                self.service(name)
                    .map(|decl| (name.to_string(), ServiceScopes::from(decl)))
            })
            .collect();

        Ok(Some(AuthRequirement {
            command_path: path,
            services: command.services.iter().map(|s| s.to_string()).collect(),
            token_types: command.token_types.to_vec(),
            requires_offline: command.requires_offline,
            service_scopes,
        }))
    }

    /// Union of the required scopes of `services`, naming any service that
    /// has nothing declared.
    pub fn required_user_scopes_from_services_report<S: AsRef<str>>(
        &self,
        services: &[S],
    ) -> ServicesReport {
        let mut scopes = BTreeSet::new();
        let mut missing = Vec::new();

        for name in services {
            let name = name.as_ref();
            match self.service(name) {
                Some(decl) if !decl.required.is_empty() => {
                    scopes.extend(decl.required.iter().map(|s| s.to_string()));
                }
                _ => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                }
            }
        }

        ServicesReport {
            scopes: scopes.into_iter().collect(),
            missing_declarations: missing,
        }
    }

    /// Suggested login scopes for `services`, sorted and deduplicated.
    pub fn suggested_user_oauth_scopes_from_services<S: AsRef<str>>(
        &self,
        services: &[S],
        readonly: bool,
    ) -> Result<Vec<String>, RegistryError> {
        let mut scopes = BTreeSet::new();
        for name in services {
            let name = name.as_ref();
            let decl = self
                .service(name)
                .ok_or_else(|| RegistryError::UnknownService {
                    name: name.to_string(),
                    known: self.list_user_oauth_services().join(", "),
                })?;
            let list = if readonly {
                decl.suggested_readonly
            } else {
                decl.suggested
            };
            scopes.extend(list.iter().map(|s| s.to_string()));
        }
        Ok(scopes.into_iter().collect())
    }

    /// Services reachable by at least one command that accepts user tokens.
    pub fn list_user_oauth_services(&self) -> Vec<&'static str> {
        self.commands
            .iter()
            .filter(|c| c.token_types.contains(&TokenType::User))
            .flat_map(|c| c.services.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every scope any service declares, sorted.
    pub fn all_user_scopes(&self) -> Vec<String> {
        self.services
            .iter()
            .flat_map(|s| {
                s.required
                    .iter()
                    .chain(s.suggested_readonly)
                    .chain(s.suggested)
            })
            .map(|s| s.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether a login for these services or scopes must request `offline_access`.
    ///
    /// True when some user-token command requiring offline access touches
    /// one of `services`, or one of its services declares one of `scopes`.
    pub fn offline_required_for<S: AsRef<str>, T: AsRef<str>>(
        &self,
        services: &[S],
        scopes: &[T],
    ) -> bool {
        self.commands
            .iter()
            .filter(|c| c.requires_offline && c.token_types.contains(&TokenType::User))
            .any(|c| {
                c.services.iter().any(|name| {
                    if services.iter().any(|s| s.as_ref() == *name) {
                        return true;
                    }
                    self.service(name).is_some_and(|decl| {
                        scopes.iter().any(|scope| {
                            let scope = scope.as_ref();
                            decl.required
                                .iter()
                                .chain(decl.suggested_readonly)
                                .chain(decl.suggested)
                                .any(|s| *s == scope)
                        })
                    })
                })
            })
    }

    /// Everything `auth explain` reports for a command.
    pub fn explain(&self, path: &str, readonly: bool) -> Result<Explanation, RegistryError> {
        let command = normalize_command_path(path);
        let Some(requirement) = self.requirements_for_command(&command)? else {
            return Ok(Explanation {
                command,
                found: false,
                services: Vec::new(),
                token_types: Vec::new(),
                requires_offline: false,
                required_user_scopes: Vec::new(),
                suggested_user_scopes: Vec::new(),
                missing_scope_declarations: Vec::new(),
                suggested_user_login_command: String::new(),
            });
        };

        let report = self.required_user_scopes_from_services_report(&requirement.services);
        let accepts_user = requirement.accepts(TokenType::User);

        let (required, suggested, login_command) = if accepts_user {
            // Undeclared services were already reported above.
            let declared: Vec<&String> = requirement
                .services
                .iter()
                .filter(|s| self.service(s).is_some())
                .collect();
            let suggested = self.suggested_user_oauth_scopes_from_services(&declared, readonly)?;
            let login_command = relogin_command(&report.scopes);
            (report.scopes, suggested, login_command)
        } else {
            (Vec::new(), Vec::new(), String::new())
        };

        Ok(Explanation {
            command,
            found: true,
            services: requirement.services,
            token_types: requirement.token_types,
            requires_offline: requirement.requires_offline,
            required_user_scopes: required,
            suggested_user_scopes: suggested,
            missing_scope_declarations: report.missing_declarations,
            suggested_user_login_command: login_command,
        })
    }
}

/// Collapse whitespace and lowercase a command path.
pub fn normalize_command_path(path: &str) -> String {
    path.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
