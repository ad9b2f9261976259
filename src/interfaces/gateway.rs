use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::core::error::GatewayError;

/// Chat identifier on the messaging network.
pub type RecipientId = i64;

/// A text message delivered to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: RecipientId,
    pub text: String,
    /// Command name without the leading `/` or a trailing `@botname`.
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl InboundEvent {
    pub fn from_text(chat_id: RecipientId, text: &str) -> Self {
        let trimmed = text.trim();
        let (command, args) = match trimmed.strip_prefix('/') {
            Some(rest) if !rest.is_empty() => {
                let mut parts = rest.split_whitespace();
                let head = parts.next().unwrap_or_default();
                let name = head.split('@').next().unwrap_or(head).to_lowercase();
                (Some(name), parts.map(str::to_string).collect())
            }
            _ => (None, Vec::new()),
        };
        Self {
            chat_id,
            text: text.to_string(),
            command,
            args,
        }
    }

    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum MessageFilter {
    /// Any text, commands included.
    Text,
    /// Text that is not a command.
    TextNonCommand,
    Pattern(Regex),
}

impl MessageFilter {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(MessageFilter::Pattern)
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        match self {
            MessageFilter::Text => true,
            MessageFilter::TextNonCommand => !event.is_command(),
            MessageFilter::Pattern(re) => re.is_match(&event.text),
        }
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type EventCallback = Arc<dyn Fn(InboundEvent) -> HandlerFuture + Send + Sync>;

/// The chat network as seen by the core.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, recipient: RecipientId, text: &str) -> Result<(), GatewayError>;

    async fn send_binary(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        filename: &str,
    ) -> Result<(), GatewayError>;

    async fn send_photo(
        &self,
        recipient: RecipientId,
        payload: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// `owner` is the job id, used to drop the handler again on removal.
    fn register_command_handler(
        &self,
        owner: &str,
        command: &str,
        description: &str,
        callback: EventCallback,
    ) -> Result<(), GatewayError>;

    fn register_message_handler(
        &self,
        owner: &str,
        filter: MessageFilter,
        callback: EventCallback,
    ) -> Result<(), GatewayError>;

    /// Returns how many handlers were removed.
    fn remove_handlers(&self, owner: &str) -> usize;

    /// Runs until `stop` is called.
    async fn run_receive_loop(&self) -> Result<(), GatewayError>;

    fn stop(&self);
}

enum Matcher {
    Command { name: String, description: String },
    Message(MessageFilter),
}

struct Route {
    owner: String,
    matcher: Matcher,
    callback: EventCallback,
}

/// Handler table shared by gateway implementations. Commands are matched
/// first, then message filters in registration order; one handler per event.
#[derive(Default)]
pub struct HandlerRoutes {
    routes: RwLock<Vec<Route>>,
}

impl HandlerRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(
        &self,
        owner: &str,
        command: &str,
        description: &str,
        callback: EventCallback,
    ) -> Result<(), GatewayError> {
        let name = command.trim_start_matches('/').to_lowercase();
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let taken = routes
            .iter()
            .any(|r| matches!(&r.matcher, Matcher::Command { name: n, .. } if *n == name));
        if taken {
            return Err(GatewayError::DuplicateCommand(name));
        }
        debug!("Registered /{} for {}", name, owner);
        routes.push(Route {
            owner: owner.to_string(),
            matcher: Matcher::Command {
                name,
                description: description.to_string(),
            },
            callback,
        });
        Ok(())
    }

    pub fn add_message(&self, owner: &str, filter: MessageFilter, callback: EventCallback) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        debug!("Registered message handler for {}", owner);
        routes.push(Route {
            owner: owner.to_string(),
            matcher: Matcher::Message(filter),
            callback,
        });
    }

    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let before = routes.len();
        routes.retain(|r| r.owner != owner);
        before - routes.len()
    }

    pub fn owned_by(&self, owner: &str) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.iter().filter(|r| r.owner == owner).count()
    }

    pub fn resolve(&self, event: &InboundEvent) -> Option<EventCallback> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        if let Some(command) = &event.command {
            let hit = routes.iter().find(
                |r| matches!(&r.matcher, Matcher::Command { name, .. } if name == command),
            );
            if let Some(route) = hit {
                return Some(route.callback.clone());
            }
        }
        routes
            .iter()
            .find(|r| matches!(&r.matcher, Matcher::Message(filter) if filter.matches(event)))
            .map(|r| r.callback.clone())
    }

    /// `(command, description)` pairs for the bot's command menu.
    pub fn commands(&self) -> Vec<(String, String)> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes
            .iter()
            .filter_map(|r| match &r.matcher {
                Matcher::Command { name, description } => Some((name.clone(), description.clone())),
                Matcher::Message(_) => None,
            })
            .collect()
    }

    /// Runs the matching handler to completion. Returns false if none matched.
    pub async fn dispatch(&self, event: InboundEvent) -> bool {
        match self.resolve(&event) {
            Some(callback) => {
                callback(event).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(tag: &'static str, seen: Arc<Mutex<Vec<String>>>) -> EventCallback {
        Arc::new(move |event: InboundEvent| -> HandlerFuture {
            let seen = seen.clone();
            Box::pin(async move {
                seen.lock().unwrap().push(format!("{}:{}", tag, event.text));
            })
        })
    }

    #[test]
    fn command_parsing() {
        let event = InboundEvent::from_text(1, "/Plugins@my_bot enable Ping_job");
        assert_eq!(event.command.as_deref(), Some("plugins"));
        assert_eq!(event.args, vec!["enable", "Ping_job"]);

        let plain = InboundEvent::from_text(1, "hello there");
        assert!(plain.command.is_none());
        assert!(plain.args.is_empty());

        assert!(InboundEvent::from_text(1, "/").command.is_none());
    }

    #[test]
    fn duplicate_command_rejected() {
        let routes = HandlerRoutes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        routes
            .add_command("A_handler", "plugins", "", recorder("a", seen.clone()))
            .unwrap();
        assert_eq!(
            routes.add_command("B_handler", "/plugins", "", recorder("b", seen)),
            Err(GatewayError::DuplicateCommand("plugins".into()))
        );
    }

    #[tokio::test]
    async fn commands_win_over_message_filters() {
        let routes = HandlerRoutes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        routes.add_message("Echo_handler", MessageFilter::Text, recorder("echo", seen.clone()));
        routes
            .add_command("Digest_job", "digest", "", recorder("digest", seen.clone()))
            .unwrap();

        assert!(routes.dispatch(InboundEvent::from_text(1, "/digest")).await);
        assert!(routes.dispatch(InboundEvent::from_text(1, "hi")).await);
        assert_eq!(*seen.lock().unwrap(), vec!["digest:/digest", "echo:hi"]);
    }

    #[tokio::test]
    async fn non_command_filter_and_removal() {
        let routes = HandlerRoutes::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        routes.add_message(
            "Echo_handler",
            MessageFilter::TextNonCommand,
            recorder("echo", seen.clone()),
        );
        assert!(!routes.dispatch(InboundEvent::from_text(1, "/unknown")).await);
        assert!(routes.dispatch(InboundEvent::from_text(1, "hey")).await);

        assert_eq!(routes.remove_owner("Echo_handler"), 1);
        assert!(!routes.dispatch(InboundEvent::from_text(1, "hey")).await);
    }

    #[test]
    fn regex_filter() {
        let filter = MessageFilter::pattern(r"^\d+$").unwrap();
        assert!(filter.matches(&InboundEvent::from_text(1, "12345")));
        assert!(!filter.matches(&InboundEvent::from_text(1, "12a")));
    }
}
