use crate::clock;
use crate::config::ChatConfig;
use crate::prompts::{SAMPLE_PROMPTS, SamplePrompt, show_prompts};
use crate::session::{SessionView, last_role};
use crate::types::{Message, MessagePart, Role, TransportStatus};
use crate::ui::UiController;
use crate::views::markdown::markdown_to_html;
use dioxus::events::Key;
use dioxus::prelude::*;
use serde_json::Value;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(80);

fn format_duration(duration_ms: f64) -> String {
    let secs = duration_ms / 1000.0;
    if secs >= 10.0 {
        format!("{secs:.0}s")
    } else {
        format!("{secs:.1}s")
    }
}

/// Waiting for the first chunk of a reply.
fn is_thinking(view: &SessionView) -> bool {
    view.status == TransportStatus::Submitted && last_role(&view.messages) == Some(Role::User)
}

/// Keep `view` in step with the session while a turn streams in the
/// background. Only copies when something actually moved.
fn use_session_poll(controller: UiController, view: Signal<SessionView>) {
    use_future(move || {
        let controller = controller.clone();
        let mut view = view;
        async move {
            let mut seen = controller.revision();
            loop {
                clock::sleep(POLL_INTERVAL).await;
                let current = controller.revision();
                if current != seen {
                    seen = current;
                    view.set(controller.view());
                }
            }
        }
    });
}

#[component]
pub fn ChatView() -> Element {
    let controller = use_context::<UiController>();
    let config = use_context::<ChatConfig>();
    let mut view = use_context::<Signal<SessionView>>();
    let mut input = use_signal(String::new);
    let mut notice = use_signal(|| Option::<String>::None);

    // Storage is only touched once the component is live on the client.
    {
        let controller = controller.clone();
        use_effect(move || {
            if controller.hydrate() {
                view.set(controller.view());
            }
        });
    }
    use_session_poll(controller.clone(), view);

    let mut send_message = {
        let controller = controller.clone();
        move |text: String| {
            let controller = controller.clone();
            notice.set(None);
            spawn(async move {
                let outcome = controller.send(&text).await;
                match outcome {
                    Ok(outcome) => tracing::debug!(?outcome, "turn finished"),
                    Err(err) => notice.set(Some(err.to_string())),
                }
                view.set(controller.view());
            });
            input.set(String::new());
            view.set(controller.view());
        }
    };

    let on_stop = {
        let controller = controller.clone();
        move |_| {
            if controller.stop() {
                view.set(controller.view());
            }
        }
    };

    let snapshot = view();
    if snapshot.is_loading() {
        return rsx! {
            div { class: "main-container",
                div { class: "loading", div { class: "spinner" } }
            }
        };
    }

    let busy = snapshot.status.is_busy();
    let char_count = input.read().trim().chars().count();
    let over_limit = char_count > config.max_message_chars;
    let count_class = if over_limit { "char-count over" } else { "char-count" };
    let error_text = snapshot
        .last_error
        .clone()
        .filter(|_| snapshot.status == TransportStatus::Error);

    let on_pick = EventHandler::new({
        let controller = controller.clone();
        move |prompt: SamplePrompt| {
            let controller = controller.clone();
            notice.set(None);
            spawn(async move {
                if let Err(err) = controller.send_prompt(&prompt).await {
                    notice.set(Some(err.to_string()));
                }
                view.set(controller.view());
            });
            view.set(controller.view());
        }
    });
    let mut send_on_enter = send_message.clone();

    rsx! {
        div { class: "main-container",
            div { class: "chat-wrap",
                if show_prompts(snapshot.messages.len()) {
                    div { class: "prompt-grid",
                        for prompt in SAMPLE_PROMPTS.iter() {
                            PromptCard { prompt: *prompt, disabled: busy, on_pick }
                        }
                    }
                }
                div { id: "chat-list", class: "chat-list",
                    for msg in snapshot.messages.iter() {
                        MessageRow {
                            key: "{msg.id}",
                            message: msg.clone(),
                            duration_ms: snapshot.durations.get(&msg.id),
                        }
                    }
                    if is_thinking(&snapshot) {
                        div { class: "message-row assistant",
                            div { class: "shimmer-line",
                                span { class: "shimmer-text", "Thinking…" }
                            }
                        }
                    }
                }
                if let Some(error) = error_text {
                    div { class: "error-banner", "Something went wrong: {error}" }
                }
                if let Some(text) = notice() {
                    div { class: "notice", "{text}" }
                }
            }

            form { class: "composer",
                div { class: "composer-inner",
                    textarea {
                        rows: "1",
                        placeholder: "Ask about customers, orders or revenue…",
                        value: "{input}",
                        oninput: move |ev| input.set(ev.value()),
                        onkeydown: move |ev: KeyboardEvent| {
                            if ev.key() == Key::Enter && !ev.modifiers().shift() {
                                ev.prevent_default();
                                if !busy {
                                    send_on_enter(input());
                                }
                            }
                        },
                        autofocus: true,
                    }
                    span { class: count_class, "{char_count}/{config.max_message_chars}" }
                    if busy {
                        button { class: "btn", r#type: "button", onclick: on_stop, "Stop" }
                    } else {
                        button {
                            class: "btn btn-primary",
                            r#type: "button",
                            disabled: char_count == 0 || over_limit,
                            onclick: move |_| send_message(input()),
                            "Send"
                        }
                    }
                }
            }
        }
    }
}

#[component]
fn PromptCard(prompt: SamplePrompt, disabled: bool, on_pick: EventHandler<SamplePrompt>) -> Element {
    rsx! {
        button {
            class: "prompt-card",
            r#type: "button",
            disabled: disabled,
            onclick: move |_| on_pick.call(prompt),
            span { class: "prompt-icon", "{prompt.icon}" }
            span { class: "prompt-title", "{prompt.title}" }
            span { class: "prompt-text", "{prompt.prompt}" }
        }
    }
}

#[component]
fn MessageRow(message: Message, #[props(!optional)] duration_ms: Option<f64>) -> Element {
    let role = message.role.as_str();
    rsx! {
        div { class: "message-row {role}",
            div { class: "message-stack",
                div { class: "bubble {role}",
                    for part in message.parts.iter() {
                        PartView { part: part.clone(), role: message.role }
                    }
                }
                if let Some(ms) = duration_ms {
                    div { class: "message-meta align-start",
                        span { class: "message-metrics", "{format_duration(ms)}" }
                    }
                }
            }
        }
    }
}

#[component]
fn PartView(part: MessagePart, role: Role) -> Element {
    match part {
        MessagePart::Text { text, .. } if role == Role::User => rsx! { "{text}" },
        MessagePart::Text { text, .. } => {
            let html = markdown_to_html(&text);
            rsx! { div { class: "md", dangerous_inner_html: "{html}" } }
        }
        MessagePart::Reasoning { text, .. } => rsx! {
            details { class: "reasoning",
                summary { "Reasoning" }
                div { class: "reasoning-text", "{text}" }
            }
        },
        MessagePart::Other(fields) => {
            let url = fields.get("url").and_then(Value::as_str).map(str::to_string);
            match url {
                Some(url) => rsx! {
                    a { class: "source-link", href: "{url}", target: "_blank", "{url}" }
                },
                None => rsx! {},
            }
        }
    }
}
