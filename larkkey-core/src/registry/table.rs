//! Compiled service and command declarations.

use crate::model::TokenType;

/// OAuth scopes a backend service is declared with.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDecl {
    pub name: &'static str,
    /// Minimal scopes a user token needs to call the service at all.
    pub required: &'static [&'static str],
    pub suggested_readonly: &'static [&'static str],
    pub suggested: &'static [&'static str],
}

/// Auth requirements of one CLI command path.
#[derive(Debug, Clone, Copy)]
pub struct CommandDecl {
    pub path: &'static str,
    pub services: &'static [&'static str],
    pub token_types: &'static [TokenType],
    pub requires_offline: bool,
}

const BOTH: &[TokenType] = &[TokenType::Tenant, TokenType::User];
const TENANT: &[TokenType] = &[TokenType::Tenant];
const USER: &[TokenType] = &[TokenType::User];

pub static SERVICES: &[ServiceDecl] = &[
    ServiceDecl {
        name: "im",
        required: &["im:message"],
        suggested_readonly: &["im:chat:readonly", "im:message:readonly"],
        suggested: &["im:chat", "im:message"],
    },
    ServiceDecl {
        name: "contact",
        required: &["contact:user.base:readonly"],
        suggested_readonly: &["contact:contact.base:readonly", "contact:user.base:readonly"],
        suggested: &["contact:contact.base:readonly", "contact:user.base:readonly"],
    },
    ServiceDecl {
        name: "drive",
        required: &["drive:drive"],
        suggested_readonly: &["drive:drive:readonly"],
        suggested: &["drive:drive"],
    },
    ServiceDecl {
        name: "docx",
        required: &["docx:document"],
        suggested_readonly: &["docx:document:readonly"],
        suggested: &["docx:document"],
    },
    ServiceDecl {
        name: "sheets",
        required: &["sheets:spreadsheet"],
        suggested_readonly: &["sheets:spreadsheet:readonly"],
        suggested: &["sheets:spreadsheet"],
    },
    ServiceDecl {
        name: "bitable",
        required: &["bitable:app"],
        suggested_readonly: &["bitable:app:readonly"],
        suggested: &["bitable:app"],
    },
    ServiceDecl {
        name: "wiki",
        required: &["wiki:wiki"],
        suggested_readonly: &["wiki:wiki:readonly"],
        suggested: &["wiki:wiki"],
    },
    ServiceDecl {
        name: "calendar",
        required: &["calendar:calendar"],
        suggested_readonly: &["calendar:calendar:readonly"],
        suggested: &["calendar:calendar"],
    },
    ServiceDecl {
        name: "task",
        required: &["task:task:read"],
        suggested_readonly: &["task:task:read"],
        suggested: &["task:task:read", "task:task:write"],
    },
    ServiceDecl {
        name: "mail",
        required: &["mail:user_mailbox.message:readonly"],
        suggested_readonly: &["mail:user_mailbox.message:readonly"],
        suggested: &[
            "mail:user_mailbox.message:readonly",
            "mail:user_mailbox.message:send",
        ],
    },
];

const fn command(
    path: &'static str,
    services: &'static [&'static str],
    token_types: &'static [TokenType],
    requires_offline: bool,
) -> CommandDecl {
    CommandDecl {
        path,
        services,
        token_types,
        requires_offline,
    }
}

pub static COMMANDS: &[CommandDecl] = &[
    // Messaging
    command("messages send", &["im"], BOTH, false),
    command("messages list", &["im"], BOTH, false),
    command("messages reply", &["im"], BOTH, false),
    command("chats list", &["im"], TENANT, false),
    command("chats create", &["im"], TENANT, false),
    command("chats members list", &["im"], BOTH, false),
    // Directory
    command("contact user get", &["contact"], BOTH, false),
    command("contact user search", &["contact"], USER, true),
    // Files and documents
    command("drive search", &["drive"], BOTH, true),
    command("drive list", &["drive"], BOTH, true),
    command("drive upload", &["drive"], BOTH, true),
    command("drive download", &["drive"], BOTH, true),
    command("drive delete", &["drive"], BOTH, true),
    command("docs fetch", &["docx"], BOTH, true),
    command("docs create", &["docx", "drive"], BOTH, true),
    command("docs update", &["docx"], BOTH, true),
    command("sheets read", &["sheets"], BOTH, true),
    command("sheets write", &["sheets"], BOTH, true),
    command("sheets create", &["sheets", "drive"], BOTH, true),
    command("base records list", &["bitable"], BOTH, true),
    command("base records create", &["bitable"], BOTH, true),
    command("base records update", &["bitable"], BOTH, true),
    command("base tables list", &["bitable"], BOTH, true),
    command("wiki spaces list", &["wiki"], BOTH, true),
    command("wiki nodes get", &["wiki"], BOTH, true),
    // Calendar and tasks
    command("calendar events list", &["calendar"], BOTH, true),
    command("calendar events create", &["calendar"], BOTH, true),
    command("calendar freebusy", &["calendar"], BOTH, true),
    command("task list", &["task"], USER, true),
    command("task create", &["task"], USER, true),
    command("task complete", &["task"], USER, true),
    // Mail is only reachable on behalf of a user
    command("mail messages list", &["mail"], USER, true),
    command("mail send", &["mail"], USER, true),
];
