//! Typed message sets exchanged over the channel.
//!
//! The two directions carry disjoint, closed sets of calls. Each set is an enum
//! mapped to and from [`RpcCall`] through a fixed dispatch table, so both ends
//! agree on the method names at compile time and an unknown name is a
//! [`RetroError::Dispatch`] instead of an arbitrary lookup.

use super::protocol::RpcCall;
use crate::config::BackgroundColor;
use crate::{Result, RetroError};
use std::path::PathBuf;

/// Conversion between a typed message and its wire call.
pub trait Message: Sized {
    /// Wire method name.
    fn method(&self) -> &'static str;

    /// Build the wire call.
    fn to_call(&self) -> RpcCall;

    /// Resolve a wire call through the dispatch table.
    fn from_call(call: &RpcCall) -> Result<Self>;
}

fn path_value(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Calls issued by the supervisor to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SetScreenSize { width: u32, height: u32 },
    SaveState { path: PathBuf },
    LoadState { path: PathBuf },
    SaveScreenshot { path: PathBuf },
    /// Save state and screenshot as `<prefix>.<state_ext>` / `<prefix>.<screenshot_ext>`.
    SaveBoth {
        prefix: String,
        state_ext: String,
        screenshot_ext: String,
    },
    SetPaused(bool),
    SetVsync(bool),
    Ping,
    ConfigChanged,
    SetBackgroundColor(BackgroundColor),
}

impl Message for Request {
    fn method(&self) -> &'static str {
        match self {
            Request::SetScreenSize { .. } => "set_screen_size",
            Request::SaveState { .. } => "save_state",
            Request::LoadState { .. } => "load_state",
            Request::SaveScreenshot { .. } => "save_screenshot",
            Request::SaveBoth { .. } => "save_both",
            Request::SetPaused(_) => "set_paused",
            Request::SetVsync(_) => "set_vsync",
            Request::Ping => "ping",
            Request::ConfigChanged => "config_changed",
            Request::SetBackgroundColor(_) => "set_background_color",
        }
    }

    fn to_call(&self) -> RpcCall {
        let call = RpcCall::new(self.method());
        match self {
            Request::SetScreenSize { width, height } => call.arg(*width).arg(*height),
            Request::SaveState { path }
            | Request::LoadState { path }
            | Request::SaveScreenshot { path } => call.arg(path_value(path)),
            Request::SaveBoth {
                prefix,
                state_ext,
                screenshot_ext,
            } => call
                .arg(prefix.as_str())
                .arg(state_ext.as_str())
                .arg(screenshot_ext.as_str()),
            Request::SetPaused(paused) => call.arg(*paused),
            Request::SetVsync(enabled) => call.arg(*enabled),
            Request::Ping | Request::ConfigChanged => call,
            Request::SetBackgroundColor(color) => call.arg(color.r).arg(color.g).arg(color.b),
        }
    }

    fn from_call(call: &RpcCall) -> Result<Self> {
        let request = match call.method.as_str() {
            "set_screen_size" => Request::SetScreenSize {
                width: call.param(0, "width")?,
                height: call.param(1, "height")?,
            },
            "save_state" => Request::SaveState {
                path: call.param::<String>(0, "filename")?.into(),
            },
            "load_state" => Request::LoadState {
                path: call.param::<String>(0, "filename")?.into(),
            },
            "save_screenshot" => Request::SaveScreenshot {
                path: call.param::<String>(0, "filename")?.into(),
            },
            "save_both" => Request::SaveBoth {
                prefix: call.param(0, "prefix")?,
                state_ext: call.param(1, "ext_state")?,
                screenshot_ext: call.param(2, "ext_screenshot")?,
            },
            "set_paused" => Request::SetPaused(call.param(0, "paused")?),
            "set_vsync" => Request::SetVsync(call.param(0, "enabled")?),
            // Keep-alive and config notifications ignore any arguments
            "ping" => Request::Ping,
            "config_changed" => Request::ConfigChanged,
            "set_background_color" => Request::SetBackgroundColor(BackgroundColor::new(
                call.param(0, "r")?,
                call.param(1, "g")?,
                call.param(2, "b")?,
            )),
            other => {
                return Err(RetroError::dispatch(other, "unknown runner method"));
            }
        };
        Ok(request)
    }
}

/// Calls issued by the runner to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Render surface exists; always the first call from the runner.
    WindowCreated { window_id: u64 },
    RenderSizeChanged { width: u32, height: u32 },
    PausedChanged(bool),
    SavingSupported,
    StateSaved { path: PathBuf },
    /// The core declared a configurable option.
    VariableAdded {
        key: String,
        description: String,
        options: Vec<String>,
    },
}

impl Message for Event {
    fn method(&self) -> &'static str {
        match self {
            Event::WindowCreated { .. } => "window_created",
            Event::RenderSizeChanged { .. } => "render_size_changed",
            Event::PausedChanged(_) => "paused_changed",
            Event::SavingSupported => "saving_supported",
            Event::StateSaved { .. } => "on_state_saved",
            Event::VariableAdded { .. } => "add_variable",
        }
    }

    fn to_call(&self) -> RpcCall {
        let call = RpcCall::new(self.method());
        match self {
            Event::WindowCreated { window_id } => call.arg(*window_id),
            Event::RenderSizeChanged { width, height } => call.arg(*width).arg(*height),
            Event::PausedChanged(paused) => call.arg(*paused),
            Event::SavingSupported => call,
            Event::StateSaved { path } => call.arg(path_value(path)),
            Event::VariableAdded {
                key,
                description,
                options,
            } => call
                .arg(key.as_str())
                .arg(description.as_str())
                .arg(options.clone()),
        }
    }

    fn from_call(call: &RpcCall) -> Result<Self> {
        let event = match call.method.as_str() {
            "window_created" => Event::WindowCreated {
                window_id: call.param(0, "window_id")?,
            },
            "render_size_changed" => Event::RenderSizeChanged {
                width: call.param(0, "width")?,
                height: call.param(1, "height")?,
            },
            "paused_changed" => Event::PausedChanged(call.param(0, "paused")?),
            "saving_supported" => Event::SavingSupported,
            "on_state_saved" => Event::StateSaved {
                path: call.param::<String>(0, "filename")?.into(),
            },
            "add_variable" => Event::VariableAdded {
                key: call.param(0, "key")?,
                description: call.param(1, "description")?,
                options: call.param(2, "options")?,
            },
            other => {
                return Err(RetroError::dispatch(other, "unknown supervisor method"));
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{decode_call, encode_call};

    fn through_wire<M: Message>(message: &M) -> M {
        let payload = encode_call(&message.to_call()).unwrap();
        M::from_call(&decode_call(&payload).unwrap()).unwrap()
    }

    #[test]
    fn test_requests_survive_the_wire() {
        let requests = [
            Request::SaveBoth {
                prefix: "/saves/mario".into(),
                state_ext: "sav".into(),
                screenshot_ext: "png".into(),
            },
            Request::SetBackgroundColor(BackgroundColor::new(0.5, 0.25, 1.0)),
            Request::LoadState {
                path: PathBuf::from("/saves/mario.sav"),
            },
        ];
        for request in requests {
            assert_eq!(through_wire(&request), request);
        }
    }

    #[test]
    fn test_events_survive_the_wire() {
        let event = Event::VariableAdded {
            key: "snes9x_overclock".into(),
            description: "SuperFX overclock".into(),
            options: vec!["disabled".into(), "40MHz".into()],
        };
        assert_eq!(through_wire(&event), event);
        assert_eq!(
            through_wire(&Event::WindowCreated { window_id: 0x3a00007 }),
            Event::WindowCreated { window_id: 0x3a00007 }
        );
    }

    #[test]
    fn test_keyword_arguments_are_accepted() {
        let call = RpcCall::new("set_paused").kwarg("paused", true);
        assert_eq!(Request::from_call(&call).unwrap(), Request::SetPaused(true));

        let call = RpcCall::new("on_state_saved").kwarg("filename", "/tmp/a.sav");
        assert_eq!(
            Event::from_call(&call).unwrap(),
            Event::StateSaved {
                path: "/tmp/a.sav".into()
            }
        );
    }

    #[test]
    fn test_ping_ignores_arguments() {
        let call = RpcCall::new("ping").arg(1).kwarg("anything", "goes");
        assert_eq!(Request::from_call(&call).unwrap(), Request::Ping);
    }

    #[test]
    fn test_unknown_method_is_dispatch_error() {
        let err = Request::from_call(&RpcCall::new("format_disk")).unwrap_err();
        assert!(matches!(err, RetroError::Dispatch { ref method, .. } if method == "format_disk"));
        // Events and requests are separate sets
        assert!(Event::from_call(&Request::Ping.to_call()).is_err());
        assert!(Request::from_call(&Event::SavingSupported.to_call()).is_err());
    }

    #[test]
    fn test_mistyped_argument_is_dispatch_error() {
        let call = RpcCall::new("set_paused").arg("yes please");
        let err = Request::from_call(&call).unwrap_err();
        assert!(!err.is_peer_loss());
    }
}
