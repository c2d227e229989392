use serde::{Deserialize, Serialize};

use crate::config::Config;

pub const DEFAULT_TITLE: &str = "Notification";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushPayload {
    /// Anything that is not a JSON object is kept as the body text. A field
    /// that is not a string is dropped on its own.
    pub fn parse(data: &[u8]) -> Self {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }

        let object = match serde_json::from_slice::<serde_json::Value>(data) {
            Ok(serde_json::Value::Object(object)) => object,
            _ => {
                tracing::warn!("malformed push payload, showing it as text");
                return Self {
                    title: None,
                    body: Some(String::from_utf8_lossy(data).into_owned()),
                };
            }
        };

        let field = |name: &str| match object.get(name) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(value)) => Some(value.clone()),
            Some(other) => {
                tracing::warn!(field = name, value = %other, "ignoring non-string push field");
                None
            }
        };

        Self {
            title: field("title"),
            body: field("body"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
}

impl Notification {
    pub fn from_payload(payload: PushPayload, icon: &str) -> Self {
        let title = payload
            .title
            .filter(|it| !it.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Self {
            title,
            body: payload.body.unwrap_or_default(),
            icon: icon.to_string(),
        }
    }
}

pub trait NotificationSink {
    fn show(&mut self, notification: Notification);
}

impl NotificationSink for Vec<Notification> {
    fn show(&mut self, notification: Notification) {
        self.push(notification);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Registered,
    Installed,
    Active,
}

pub struct NotificationAgent<S> {
    sink: S,
    icon: String,
    state: AgentState,
}

impl<S> NotificationAgent<S>
where
    S: NotificationSink,
{
    pub fn new(sink: S, icon: impl Into<String>) -> Self {
        Self {
            sink,
            icon: icon.into(),
            state: AgentState::Registered,
        }
    }

    pub fn from_config(sink: S, config: &Config) -> Self {
        Self::new(sink, config.notification_icon.clone())
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn install(&mut self) {
        if self.state == AgentState::Registered {
            tracing::debug!("notification agent installed");
            self.state = AgentState::Installed;
        }
    }

    pub fn activate(&mut self) {
        self.install();
        if self.state == AgentState::Installed {
            tracing::debug!("notification agent active");
            self.state = AgentState::Active;
        }
    }

    pub fn on_push(&mut self, data: Option<&[u8]>) -> Notification {
        let payload = data.map(PushPayload::parse).unwrap_or_default();
        let notification = Notification::from_payload(payload, &self.icon);

        tracing::debug!(title = %notification.title, "showing notification");
        self.sink.show(notification.clone());

        notification
    }
}
