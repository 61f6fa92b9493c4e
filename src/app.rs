use crate::delivery::{DiscoveryEvent, ResultDeliveryChannel};
use crate::permission::{PermissionKind, PermissionOutcome};
use crate::permission_host::{PermissionPrompt, PromptPermissionHost};
use crate::radio::BtleRadio;
use crate::session::{ScanSessionController, SessionState, ToggleOutcome};
use crate::ui::styles;
use crossbeam_channel::Receiver;
use iced::widget::{button, column, container, row, scrollable, text};
use iced::{Element, Length, Subscription, Task};
use std::collections::VecDeque;

pub type Controller = ScanSessionController<BtleRadio, PromptPermissionHost>;

/// Everything the UI needs, wired up in `main`
pub struct Wiring {
    pub controller: Controller,
    pub host: PromptPermissionHost,
    pub delivery: ResultDeliveryChannel,
    pub state_receiver: Receiver<SessionState>,
    pub discovery_receiver: Receiver<DiscoveryEvent>,
    pub prompt_receiver: Receiver<PermissionPrompt>,
    pub max_listed_devices: usize,
}

// Iced Application State
pub struct FeatherScan {
    controller: Controller,
    host: PromptPermissionHost,
    // Owns the dispatcher thread; dropped with the app
    _delivery: ResultDeliveryChannel,
    state_receiver: Receiver<SessionState>,
    discovery_receiver: Receiver<DiscoveryEvent>,
    prompt_receiver: Receiver<PermissionPrompt>,
    session_state: SessionState,
    active_prompt: Option<PermissionPrompt>,
    queued_prompts: VecDeque<PermissionPrompt>,
    discoveries: VecDeque<DiscoveryEvent>,
    max_listed_devices: usize,
}

#[derive(Debug, Clone)]
pub enum Message {
    Tick,
    ToggleScan,
    AnswerPrompt(bool),
    RevokePermission(PermissionKind),
}

impl FeatherScan {
    pub fn new(wiring: Wiring) -> (Self, Task<Message>) {
        (
            FeatherScan {
                session_state: wiring.controller.state(),
                controller: wiring.controller,
                host: wiring.host,
                _delivery: wiring.delivery,
                state_receiver: wiring.state_receiver,
                discovery_receiver: wiring.discovery_receiver,
                prompt_receiver: wiring.prompt_receiver,
                active_prompt: None,
                queued_prompts: VecDeque::new(),
                discoveries: VecDeque::new(),
                max_listed_devices: wiring.max_listed_devices,
            },
            Task::none(),
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                // Process all pending updates without blocking
                for state in self.state_receiver.try_iter() {
                    self.session_state = state;
                }

                self.queued_prompts.extend(self.prompt_receiver.try_iter());
                if self.active_prompt.is_none() {
                    self.active_prompt = self.queued_prompts.pop_front();
                }

                for event in self.discovery_receiver.try_iter() {
                    self.discoveries.push_front(event);
                }
                self.discoveries.truncate(self.max_listed_devices);
                Task::none()
            }
            Message::ToggleScan => {
                match self.controller.toggle_requested() {
                    ToggleOutcome::Transitioned(state) => {
                        log::debug!("UI: toggle moved session to {:?}", state);
                    }
                    ToggleOutcome::Blocked(e) => {
                        // Label stays as it is; a permission dialog may follow
                        log::info!("UI: toggle had no effect: {}", e);
                    }
                }
                Task::none()
            }
            Message::AnswerPrompt(allow) => {
                if let Some(prompt) = self.active_prompt.take() {
                    let result = self.host.answer(&prompt, allow);
                    self.controller.on_permission_result(&result);
                }
                self.active_prompt = self.queued_prompts.pop_front();
                Task::none()
            }
            Message::RevokePermission(kind) => {
                self.host.revoke(kind);
                Task::none()
            }
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        iced::time::every(std::time::Duration::from_millis(16)).map(|_| Message::Tick)
    }

    pub fn view(&'_ self) -> Element<'_, Message> {
        let sidebar = self.create_sidebar();
        let main_content = self.create_discovery_view();

        let content = row![sidebar, main_content].spacing(0);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn create_sidebar(&self) -> Element<'_, Message> {
        let title = text("BLE Scan").size(20);
        let status = text(self.session_state.status_label()).size(16);
        let waiting = if self.controller.gate().is_awaiting_answer() {
            text("Waiting for permission").size(12)
        } else {
            text("").size(12)
        };

        let toggle_button = button(text(self.session_state.button_label()))
            .on_press(Message::ToggleScan)
            .padding(10)
            .width(Length::Fill)
            .style(styles::toggle_button_style(self.session_state));

        let mut sidebar_content = column![title, status, waiting, toggle_button, self.create_permission_panel()]
            .spacing(10)
            .padding(20)
            .width(300);

        if let Some(prompt) = &self.active_prompt {
            sidebar_content = sidebar_content.push(Self::create_prompt_dialog(prompt));
        }

        container(sidebar_content)
            .style(container::bordered_box)
            .width(Length::Fixed(300.0))
            .height(Length::Fill)
            .into()
    }

    fn create_permission_panel(&self) -> Element<'_, Message> {
        let gate = self.controller.gate();
        let required = self.controller.required_permissions();
        let rows = PermissionKind::all().into_iter().map(|kind| {
            if !required.contains(&kind) {
                // Implicitly granted on this platform tier
                return row![
                    text(kind.label()).size(14).width(Length::Fill),
                    text("Not required").size(14),
                ]
                .spacing(8)
                .into();
            }

            let outcome = gate.outcome(kind);
            let label = match outcome {
                PermissionOutcome::Granted => "Granted",
                PermissionOutcome::Denied => "Denied",
                PermissionOutcome::Pending => "Pending",
            };

            let revoke: Element<'_, Message> = if outcome == PermissionOutcome::Granted {
                button(text("Revoke").size(12))
                    .on_press(Message::RevokePermission(kind))
                    .padding(4)
                    .style(styles::secondary_button_style())
                    .into()
            } else {
                text("").into()
            };

            row![
                text(kind.label()).size(14).width(Length::Fill),
                text(label).size(14).color(styles::outcome_color(outcome)),
                revoke,
            ]
            .spacing(8)
            .into()
        });

        column![text("Permissions").size(16), column(rows).spacing(4)]
            .spacing(6)
            .into()
    }

    fn create_prompt_dialog(prompt: &PermissionPrompt) -> Element<'_, Message> {
        let kinds = prompt
            .kinds
            .iter()
            .map(|kind| kind.label())
            .collect::<Vec<_>>()
            .join(", ");

        let buttons = row![
            button(text("Allow"))
                .on_press(Message::AnswerPrompt(true))
                .padding(8)
                .style(styles::prompt_button_style(true)),
            button(text("Deny"))
                .on_press(Message::AnswerPrompt(false))
                .padding(8)
                .style(styles::prompt_button_style(false)),
        ]
        .spacing(10);

        container(
            column![
                text("Permission required").size(16),
                text(format!("Allow access to: {}", kinds)).size(14),
                buttons,
            ]
            .spacing(8),
        )
        .padding(10)
        .style(container::rounded_box)
        .into()
    }

    fn create_discovery_view(&self) -> Element<'_, Message> {
        if self.discoveries.is_empty() {
            let message = match self.session_state {
                SessionState::Scanning => "Scanning for devices...",
                SessionState::Idle => "Press Start to scan for devices",
            };

            return container(text(message).size(24))
                .width(Length::Fill)
                .height(Length::Fill)
                .center(Length::Fill)
                .into();
        }

        let entries = self.discoveries.iter().map(|event| {
            let rssi = event
                .rssi
                .map(|rssi| format!("{} dBm", rssi))
                .unwrap_or_else(|| "n/a".to_string());

            text(format!(
                "{}  {}  [{}]  {}",
                event.received_at.format("%H:%M:%S"),
                event.display_name(),
                event.device_id,
                rssi
            ))
            .size(14)
            .into()
        });

        container(
            column![
                text("Recent discoveries").size(20),
                scrollable(column(entries).spacing(4)),
            ]
            .spacing(10),
        )
        .padding(20)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }
}
