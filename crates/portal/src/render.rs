//! Message templates.
//!
//! Templates are Jinja-flavoured markdown rendered with `minijinja`, so
//! operators can use loops, conditionals and filters:
//!
//! ```text
//! {% if agents %}{{ agents|join(", ") }}{% else %}unclaimed{% endif %}
//! ```
//!
//! Every template is compiled from `prepend + source`, which lets a shared
//! header or macro block be configured once. Undefined values, including
//! attributes of undefined values, render as an empty string.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use database::Case;
use minijinja::{context, Environment, UndefinedBehavior, Value};

use crate::error::RenderError;
use crate::event::PortalEvent;

pub const WELCOME: &str = "welcome";
pub const INVITE_ERROR: &str = "invite_error";
pub const NEW_CASE: &str = "new_case";
pub const CASE_STATUS: &str = "case_status";
pub const CASE_MESSAGE: &str = "case_message";
pub const CASE_ACCEPTED: &str = "case_accepted";
pub const NEW_USER: &str = "new_user";
pub const CASE_CLOSED: &str = "case_closed";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        WELCOME,
        "Hi {{ case.displayname }}, thanks for reaching out. An agent will be with you shortly.",
    ),
    (
        INVITE_ERROR,
        "Failed to open a case for `{{ evt.room_id }}` (invited by {{ evt.sender }}): {{ error }}",
    ),
    (
        NEW_CASE,
        "New case from **{{ case.displayname }}** in {{ case.room_name }} (`{{ case.id }}`)",
    ),
    (
        CASE_STATUS,
        r#"**{{ case.room_name }}** ({{ case.displayname }}): agents in room: {{ agents|join(", ") if agents else "none" }}"#,
    ),
    (
        CASE_MESSAGE,
        "**{{ case.displayname }}** in {{ case.room_name }}: {{ evt.body }}",
    ),
    (
        CASE_ACCEPTED,
        "**{{ case.room_name }}** ({{ case.displayname }}): claimed by {{ agent.displayname }}",
    ),
    (
        NEW_USER,
        "Welcome {{ user.displayname }}. An agent will be with you shortly.",
    ),
    (
        CASE_CLOSED,
        "**{{ case.room_name }}** ({{ case.displayname }}): user left, case closed",
    ),
];

/// Named templates plus a shared prefix, compiled once per settings swap.
#[derive(Clone)]
pub struct TemplateSet {
    prepend: String,
    sources: BTreeMap<String, String>,
    env: Arc<Environment<'static>>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        match Self::new("", HashMap::new()) {
            Ok(set) => set,
            Err(e) => {
                tracing::error!("Built-in templates failed to compile: {}", e);
                Self {
                    prepend: String::new(),
                    sources: BTreeMap::new(),
                    env: Arc::new(Environment::new()),
                }
            }
        }
    }
}

impl fmt::Debug for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSet")
            .field("prepend", &self.prepend)
            .field("templates", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for TemplateSet {
    fn eq(&self, other: &Self) -> bool {
        self.prepend == other.prepend && self.sources == other.sources
    }
}

impl Eq for TemplateSet {}

impl TemplateSet {
    /// Defaults overlaid with the given templates. Fails if any template
    /// does not parse.
    pub fn new(
        prepend: impl Into<String>,
        overrides: HashMap<String, String>,
    ) -> Result<Self, RenderError> {
        let prepend = prepend.into();
        let mut sources: BTreeMap<String, String> = DEFAULT_TEMPLATES
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        sources.extend(overrides);

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        for (name, source) in &sources {
            env.add_template_owned(name.clone(), format!("{}{}", prepend, source))
                .map_err(|e| RenderError::template(name, e))?;
        }

        Ok(Self {
            prepend,
            sources,
            env: Arc::new(env),
        })
    }

    pub fn prepend(&self) -> &str {
        &self.prepend
    }

    /// Template names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Render a template. Output depends only on the template and the context.
    pub fn render(&self, name: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        if !self.sources.contains_key(name) {
            return Err(RenderError::MissingTemplate(name.to_string()));
        }
        let template = self
            .env
            .get_template(name)
            .map_err(|e| RenderError::template(name, e))?;
        let rendered = template
            .render(&ctx.values)
            .map_err(|e| RenderError::template(name, e))?;
        Ok(rendered.trim().to_string())
    }
}

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: BTreeMap<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn case(self, case: &Case) -> Self {
        self.insert("case", Value::from_serialize(case))
    }

    pub fn event(self, evt: &PortalEvent) -> Self {
        self.insert(
            "evt",
            context! {
                room_id => evt.room_id,
                event_id => evt.event_id,
                sender => evt.sender,
                kind => evt.kind_name(),
                body => evt.body(),
            },
        )
    }

    /// Agents as `(user_id, display name)`. Names are sorted so the output
    /// does not depend on membership order.
    pub fn agents(self, agents: &[(String, String)]) -> Self {
        let mut names: Vec<String> = agents.iter().map(|(_, name)| name.clone()).collect();
        names.sort_unstable();
        self.insert("agents", names)
            .insert("agent_count", agents.len())
    }

    pub fn agent(self, user_id: &str, displayname: &str) -> Self {
        self.insert(
            "agent",
            context! { id => user_id, displayname => displayname },
        )
    }

    pub fn user(self, user_id: &str, displayname: &str) -> Self {
        self.insert(
            "user",
            context! { id => user_id, displayname => displayname },
        )
    }

    pub fn error(self, message: impl Into<String>) -> Self {
        self.insert("error", message.into())
    }
}
