use gloo_storage::Storage;
use leptos::prelude::*;

use terrashear_shared::preset::ViewPreset;
use terrashear_shared::shear::{ShearConfig, StaticShearConfig};
use terrashear_shared::{FrameState, RenderParameters, ShearMode, TileGrid, TilePyramidResolver, ViewState};

use crate::canvas::MapCanvas;
use crate::viewport::Viewport;

const SETTINGS_KEY: &str = "terrashear_settings";
const VIEW_HASH_PREFIX: &str = "#view=";

/// Newtype wrappers give each signal a distinct type for Leptos context.
#[derive(Clone, Copy)]
pub(crate) struct Params(pub RwSignal<RenderParameters>);
#[derive(Clone, Copy)]
pub(crate) struct ShearModeSetting(pub RwSignal<ShearMode>);
#[derive(Clone, Copy)]
pub(crate) struct StatusReadout(pub RwSignal<Status>);
/// Settings that only take effect on reload (tile sources, physics constants).
#[derive(Clone, Copy)]
pub(crate) struct SessionSettings(pub StoredValue<Settings>);

/// What the status panel shows. Written by the render loop only when it changes.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub(crate) struct Status {
    pub elevation: Option<f64>,
    pub visible: Option<(f64, f64)>,
    pub frame: FrameState,
    pub draw_calls: u32,
    pub substitutes: u32,
    pub shearing: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub view: ViewPreset,
    pub shear: ShearConfig,
    pub static_shear: StaticShearConfig,
    pub resolver: TilePyramidResolver,
    pub max_render_retries: u32,
    pub segment_count: u32,
    pub terrain_url: String,
    /// Empty disables the overlay layer.
    pub overlay_url: String,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            view: ViewPreset::default(),
            shear: ShearConfig::default(),
            static_shear: StaticShearConfig::default(),
            resolver: TilePyramidResolver::default(),
            max_render_retries: terrashear_shared::mosaic::DEFAULT_MAX_RENDER_RETRIES,
            segment_count: terrashear_shared::elevation::DEFAULT_SEGMENT_COUNT,
            terrain_url: "/tiles/terrain/{z}/{x}/{y}.png".into(),
            overlay_url: String::new(),
            log_level: "info".into(),
        }
    }
}

impl Settings {
    pub fn load() -> Self {
        gloo_storage::LocalStorage::get(SETTINGS_KEY).unwrap_or_default()
    }
}

/// A preset shared through the address bar (`#view=<json>`), if any.
fn preset_from_hash() -> Option<ViewPreset> {
    let hash = web_sys::window()?.location().hash().ok()?;
    let encoded = hash.strip_prefix(VIEW_HASH_PREFIX)?;
    let json: String = js_sys::decode_uri_component(encoded).ok()?.into();
    match ViewPreset::from_json(&json) {
        Ok(preset) => Some(preset),
        Err(err) => {
            tracing::warn!(%err, "ignoring malformed view in address bar");
            None
        }
    }
}

fn write_preset_to_hash(preset: &ViewPreset) {
    let json = match preset.to_json() {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(%err, "cannot serialize view");
            return;
        }
    };
    let encoded: String = js_sys::encode_uri_component(&json).into();
    if let Some(window) = web_sys::window() {
        let _ = window.location().set_hash(&format!("view={encoded}"));
    }
}

fn snapshot(name: &str, vp: &Viewport, params: RenderParameters, shear_mode: ShearMode) -> ViewPreset {
    ViewPreset {
        name: name.to_string(),
        center: vp.view.center,
        resolution: vp.view.resolution,
        rotation: vp.view.rotation,
        params,
        shear_mode,
    }
}

pub(crate) fn format_meters(meters: Option<f64>) -> String {
    match meters {
        Some(m) if m.abs() >= 1000.0 => format!("{:.2} km", m / 1000.0),
        Some(m) => format!("{m:.0} m"),
        None => "n/a".to_string(),
    }
}

#[component]
pub fn App() -> impl IntoView {
    let saved = Settings::load();
    let grid = TileGrid::default();
    let start = preset_from_hash().unwrap_or_else(|| saved.view.clone());

    let viewport: RwSignal<Viewport> = RwSignal::new(Viewport::new(
        &grid,
        ViewState {
            center: start.center,
            resolution: start.resolution,
            rotation: start.rotation,
            ..ViewState::default()
        },
    ));
    let params: RwSignal<RenderParameters> = RwSignal::new(start.params);
    let shear_mode: RwSignal<ShearMode> = RwSignal::new(start.shear_mode);
    let status: RwSignal<Status> = RwSignal::new(Status::default());
    let session: StoredValue<Settings> = StoredValue::new(saved);

    provide_context(viewport);
    provide_context(Params(params));
    provide_context(ShearModeSetting(shear_mode));
    provide_context(StatusReadout(status));
    provide_context(SessionSettings(session));

    // Persist camera and styling on change
    Effect::new(move || {
        let vp = viewport.get();
        let p = params.get();
        let mode = shear_mode.get();
        let mut settings = session.get_value();
        settings.view = snapshot(&settings.view.name, &vp, p, mode);
        let _ = gloo_storage::LocalStorage::set(SETTINGS_KEY, &settings);
    });

    view! {
        <div style="width: 100%; height: 100%; position: relative; overflow: hidden; background: #0c0e17;">
            <MapCanvas />
            <StatusPanel />
        </div>
    }
}

/// Readout in the corner: elevation under the cursor, visible range, frame state, toggles.
#[component]
fn StatusPanel() -> impl IntoView {
    let viewport: RwSignal<Viewport> = expect_context();
    let Params(params) = expect_context();
    let ShearModeSetting(shear_mode) = expect_context();
    let StatusReadout(status) = expect_context();

    let elevation = move || format_meters(status.get().elevation);
    let visible = move || match status.get().visible {
        Some((min, max)) => format!("{} .. {}", format_meters(Some(min)), format_meters(Some(max))),
        None => "loading".to_string(),
    };
    let frame = move || {
        let s = status.get();
        let state = match s.frame {
            FrameState::Cached => "cached",
            FrameState::Rendering => "rendering",
        };
        if s.substitutes > 0 {
            format!("{state} · {} draws, {} stand-ins", s.draw_calls, s.substitutes)
        } else {
            format!("{state} · {} draws", s.draw_calls)
        }
    };
    let mode_label = move || match shear_mode.get() {
        ShearMode::Integrated => "Shear: spring",
        ShearMode::Static => "Shear: direct",
    };
    let overlay_label = move || {
        if params.get().overlay_enabled {
            "Overlay: on"
        } else {
            "Overlay: off"
        }
    };
    let share_view = move |_| {
        let preset = snapshot(
            "shared view",
            &viewport.get_untracked(),
            params.get_untracked(),
            shear_mode.get_untracked(),
        );
        write_preset_to_hash(&preset);
    };

    view! {
        <div style="position: absolute; left: 12px; bottom: 12px; z-index: 10; padding: 8px 10px; background: rgba(19,22,31,0.88); border: 1px solid #282c3e; border-radius: 6px; color: #e2e0d8; font-family: 'JetBrains Mono', monospace; font-size: 0.72rem; line-height: 1.5; display: flex; flex-direction: column; gap: 2px; min-width: 220px;">
            <div>"elevation " {elevation}</div>
            <div>"in view " {visible}</div>
            <div style:color=move || if status.get().shearing { "#f5c542" } else { "#8a8890" }>
                "frame " {frame}
            </div>
            <div style="display: flex; gap: 6px; margin-top: 4px;">
                <button
                    class="panel-button"
                    on:click=move |_| shear_mode.update(|m| {
                        *m = match *m {
                            ShearMode::Integrated => ShearMode::Static,
                            ShearMode::Static => ShearMode::Integrated,
                        }
                    })
                >
                    {mode_label}
                </button>
                <button
                    class="panel-button"
                    on:click=move |_| params.update(|p| p.overlay_enabled = !p.overlay_enabled)
                >
                    {overlay_label}
                </button>
                <button class="panel-button" title="Put this view in the address bar" on:click=share_view>
                    "Share"
                </button>
            </div>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meters_are_readable() {
        assert_eq!(format_meters(Some(412.4)), "412 m");
        assert_eq!(format_meters(Some(4_807.0)), "4.81 km");
        assert_eq!(format_meters(Some(-1_200.0)), "-1.20 km");
        assert_eq!(format_meters(None), "n/a");
    }

    #[test]
    fn older_settings_blobs_still_load() {
        let settings: Settings =
            serde_json::from_str(r#"{ "terrain_url": "/dem/{z}/{x}/{y}.png" }"#).expect("parses");
        assert_eq!(settings.terrain_url, "/dem/{z}/{x}/{y}.png");
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.max_render_retries, 120);
        assert_eq!(settings.view.shear_mode, ShearMode::Integrated);
    }
}
