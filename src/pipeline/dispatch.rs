//! Rendering and delivering notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Config, Templates, TrackedEntity};
use crate::pipeline::detect::{Change, ChangeKind};
use crate::services::Notifier;
use crate::utils::{escape_html, fill_template, truncate_graphemes};

/// Renders changes and sends them through a [`Notifier`], pacing sends.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    templates: Templates,
    html: bool,
    max_title_graphemes: usize,
    send_delay: Duration,
    last_send: Option<Instant>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        Self {
            notifier,
            templates: config.dispatch.templates.clone(),
            html: config.telegram.is_html(),
            max_title_graphemes: config.dispatch.max_title_graphemes,
            send_delay: Duration::from_millis(config.dispatch.send_delay_ms),
            last_send: None,
        }
    }

    /// Render the message for one change.
    ///
    /// The title is shortened until the message fits the notifier's limit,
    /// so markup from the templates is never cut.
    pub fn format(&self, entity: &TrackedEntity, change: &Change) -> String {
        let title = change.item.title.trim();
        let title = if title.is_empty() {
            self.templates.empty_title.as_str()
        } else {
            title
        };
        let render = |budget: usize| self.render(entity, change, &truncate_graphemes(title, budget));
        let max = self.max_title_graphemes.min(title.graphemes(true).count());

        let text = render(max);
        let Some(limit) = self.notifier.max_message_len() else {
            return text;
        };
        let fits = |text: &str| text.encode_utf16().count() <= limit;
        if fits(&text) {
            return text;
        }

        // Largest title budget that fits; length grows with the budget.
        let (mut lo, mut hi) = (0, max.saturating_sub(1));
        while lo < hi {
            let mid = (lo + hi).div_ceil(2);
            if fits(&render(mid)) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let text = render(lo);
        if !fits(&text) {
            log::warn!(
                "Message for {}/{} exceeds {} units even without a title",
                entity.id,
                change.item.id,
                limit
            );
        }
        text
    }

    fn render(&self, entity: &TrackedEntity, change: &Change, title: &str) -> String {
        let item = &change.item;
        let escape = |text: &str| {
            if self.html {
                escape_html(text)
            } else {
                text.to_string()
            }
        };
        let raw_link = item.link.as_deref().unwrap_or_default();
        let (id, name, title, link) = (
            escape(&entity.id),
            escape(entity.display_name()),
            escape(title),
            escape(raw_link),
        );

        let values = [
            ("entity", id.as_str()),
            ("name", name.as_str()),
            ("title", title.as_str()),
            ("link", link.as_str()),
            ("source", item.source_tag.as_str()),
            ("id", item.id.as_str()),
        ];

        let template = match change.kind {
            ChangeKind::NewItem => &self.templates.new_item,
            ChangeKind::WentLive => &self.templates.went_live,
            ChangeKind::WentOffline => &self.templates.went_offline,
        };
        let mut text = fill_template(template, &values);
        if !raw_link.is_empty() {
            text.push_str(&fill_template(&self.templates.link, &values));
        }
        text
    }

    /// Send the start-of-run probe message.
    ///
    /// Any failure here is a [`AppError::SelfCheck`].
    pub async fn self_check(&mut self) -> Result<()> {
        let text = self.templates.self_check.clone();
        match self.send(&text).await {
            Ok(()) => {
                log::info!("Self-check message delivered");
                Ok(())
            }
            Err(e) => {
                log::error!("Self-check failed, aborting run: {e}");
                Err(AppError::SelfCheck(e.to_string()))
            }
        }
    }

    /// Render and send one change; returns whether it was delivered.
    pub async fn deliver(&mut self, entity: &TrackedEntity, change: &Change) -> bool {
        let text = self.format(entity, change);
        match self.send(&text).await {
            Ok(()) => {
                log::info!("Pushed {}/{}", entity.id, change.item.id);
                true
            }
            Err(AppError::Auth(e)) => {
                log::error!(
                    "Push rejected for {}/{} (check bot token and chat id): {}",
                    entity.id,
                    change.item.id,
                    e
                );
                false
            }
            Err(e) => {
                log::error!("Push failed for {}/{}: {}", entity.id, change.item.id, e);
                false
            }
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        if let Some(last) = self.last_send {
            let elapsed = last.elapsed();
            if elapsed < self.send_delay {
                tokio::time::sleep(self.send_delay - elapsed).await;
            }
        }
        let result = self.notifier.send(text).await;
        self.last_send = Some(Instant::now());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Item;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Instant)>>,
        fail: bool,
        limit: Option<usize>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(AppError::auth("HTTP 401 Unauthorized"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((text.to_string(), Instant::now()));
            Ok(())
        }

        fn max_message_len(&self) -> Option<usize> {
            self.limit
        }
    }

    fn config(delay_ms: u64) -> Config {
        let mut config = Config::default();
        config.dispatch.send_delay_ms = delay_ms;
        config
    }

    fn change(kind: ChangeKind, title: &str, link: Option<&str>) -> Change {
        let mut item = Item::new("100", title, "dynamic");
        item.link = link.map(str::to_string);
        Change { kind, item }
    }

    #[test]
    fn test_format_new_item_with_link() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config(0));
        let text = dispatcher.format(
            &TrackedEntity::new("42"),
            &change(ChangeKind::NewItem, "Hello <world>", Some("https://t.bilibili.com/100")),
        );

        assert_eq!(
            text,
            "👀 <b>UP 42 有新动态</b>\n📝 Hello &lt;world&gt;\n🔗 https://t.bilibili.com/100"
        );
    }

    #[test]
    fn test_format_without_link_and_empty_title() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config(0));
        let mut entity = TrackedEntity::new("42");
        entity.name = Some("Alice".into());

        let text = dispatcher.format(&entity, &change(ChangeKind::NewItem, "  ", None));
        assert_eq!(text, "👀 <b>UP Alice 有新动态</b>\n📝 新动态");
    }

    #[test]
    fn test_format_status_templates() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config(0));
        let entity = TrackedEntity::new("7");

        let live = dispatcher.format(&entity, &change(ChangeKind::WentLive, "Stream", None));
        let offline = dispatcher.format(&entity, &change(ChangeKind::WentOffline, "Stream", None));
        assert!(live.contains("开播"));
        assert!(offline.contains("下播"));
    }

    #[test]
    fn test_format_escapes_every_html_value() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config(0));
        let mut entity = TrackedEntity::new("a&b");
        entity.name = Some("R&D".into());

        let text = dispatcher.format(
            &entity,
            &change(ChangeKind::NewItem, "Q&A", Some("https://x/?a=1&b=2")),
        );
        assert_eq!(
            text,
            "👀 <b>UP R&amp;D 有新动态</b>\n📝 Q&amp;A\n🔗 https://x/?a=1&amp;b=2"
        );
    }

    #[test]
    fn test_format_plain_mode_leaves_text_alone() {
        let mut config = config(0);
        config.telegram.parse_mode = String::new();
        config.dispatch.templates.new_item = "{entity} {title}".into();
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config);

        let text = dispatcher.format(
            &TrackedEntity::new("a&b"),
            &change(ChangeKind::NewItem, "<Q&A>", Some("https://x/?a=1&b=2")),
        );
        assert_eq!(text, "a&b <Q&A>\n🔗 https://x/?a=1&b=2");
    }

    #[test]
    fn test_format_shortens_title_to_fit_limit() {
        let notifier = Arc::new(RecordingNotifier {
            limit: Some(60),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(notifier, &config(0));
        let title = "长&".repeat(100);

        let text = dispatcher.format(
            &TrackedEntity::new("1"),
            &change(ChangeKind::NewItem, &title, Some("https://t.bilibili.com/1")),
        );
        assert!(text.encode_utf16().count() <= 60);
        assert!(text.starts_with("👀 <b>UP 1 有新动态</b>"));
        assert!(text.ends_with("…\n🔗 https://t.bilibili.com/1"));
        assert!(text.contains("📝 长&amp;长…"));
    }

    #[test]
    fn test_format_is_deterministic() {
        let dispatcher = Dispatcher::new(Arc::new(RecordingNotifier::default()), &config(0));
        let entity = TrackedEntity::new("1");
        let c = change(ChangeKind::NewItem, "Same", Some("https://x"));
        assert_eq!(dispatcher.format(&entity, &c), dispatcher.format(&entity, &c));
    }

    #[tokio::test]
    async fn test_sends_are_spaced() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = Dispatcher::new(notifier.clone(), &config(30));
        let entity = TrackedEntity::new("1");

        dispatcher.self_check().await.unwrap();
        assert!(dispatcher.deliver(&entity, &change(ChangeKind::NewItem, "a", None)).await);
        assert!(dispatcher.deliver(&entity, &change(ChangeKind::NewItem, "b", None)).await);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for pair in sent.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(30));
        }
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let mut dispatcher = Dispatcher::new(notifier, &config(0));

        assert!(matches!(
            dispatcher.self_check().await,
            Err(AppError::SelfCheck(_))
        ));
        assert!(
            !dispatcher
                .deliver(&TrackedEntity::new("1"), &change(ChangeKind::NewItem, "a", None))
                .await
        );
    }
}
