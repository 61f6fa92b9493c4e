//! # UI Styling Module
//!
//! Centralized styling utilities for consistent UI appearance across components.

use crate::permission::PermissionOutcome;
use crate::session::SessionState;
use iced::widget::button;
use iced::{Background, Border, Color};

const GREEN: (f32, f32, f32) = (0.2, 0.7, 0.2);
const RED: (f32, f32, f32) = (0.8, 0.2, 0.2);
const GRAY: (f32, f32, f32) = (0.4, 0.4, 0.4);

fn shade((r, g, b): (f32, f32, f32), delta: f32) -> Color {
    Color::from_rgb(
        (r + delta).clamp(0.0, 1.0),
        (g + delta).clamp(0.0, 1.0),
        (b + delta).clamp(0.0, 1.0),
    )
}

/// Solid button: lighter on hover, darker when pressed
fn filled_button(base: (f32, f32, f32), status: button::Status) -> button::Style {
    let (background, border) = match status {
        button::Status::Active => (shade(base, 0.0), shade(base, 0.1)),
        button::Status::Hovered => (shade(base, 0.1), shade(base, 0.2)),
        button::Status::Pressed => (shade(base, -0.05), shade(base, 0.0)),
        button::Status::Disabled => {
            return button::Style {
                background: Some(Background::Color(Color::from_rgb(0.3, 0.3, 0.3))),
                text_color: Color::from_rgb(0.6, 0.6, 0.6),
                border: Border {
                    color: Color::from_rgb(0.4, 0.4, 0.4),
                    width: 1.0,
                    radius: 4.0.into(),
                },
                ..Default::default()
            }
        }
    };

    button::Style {
        background: Some(Background::Color(background)),
        text_color: Color::WHITE,
        border: Border {
            color: border,
            width: 1.0,
            radius: 4.0.into(),
        },
        ..Default::default()
    }
}

/// Start is green, Stop is red
pub fn toggle_button_style(state: SessionState) -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    move |_theme: &iced::Theme, status: button::Status| match state {
        SessionState::Idle => filled_button(GREEN, status),
        SessionState::Scanning => filled_button(RED, status),
    }
}

/// Style for the Allow/Deny buttons of the permission dialog
pub fn prompt_button_style(allow: bool) -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    move |_theme: &iced::Theme, status: button::Status| {
        if allow {
            filled_button(GREEN, status)
        } else {
            filled_button(RED, status)
        }
    }
}

/// Neutral gray, used for Revoke
pub fn secondary_button_style() -> impl Fn(&iced::Theme, button::Status) -> button::Style {
    |_theme: &iced::Theme, status: button::Status| filled_button(GRAY, status)
}

/// Text color for a permission's state in the permission panel
pub fn outcome_color(outcome: PermissionOutcome) -> Color {
    match outcome {
        PermissionOutcome::Granted => shade(GREEN, 0.0),
        PermissionOutcome::Denied => shade(RED, 0.0),
        PermissionOutcome::Pending => Color::from_rgb(0.8, 0.6, 0.1),
    }
}
