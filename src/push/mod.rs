mod dispatcher;
mod notify;

pub use dispatcher::Pusher;
pub use notify::{LogNotifier, Notifier, NullResolver, Resolver, WebhookNotifier};
