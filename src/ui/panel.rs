use crate::capture::audio::{ArecordMicrophone, AudioRecorder};
use crate::capture::crop::{CropData, GrimCapturer, SelectorEvent, SlurpSelector};
use crate::capture::CaptureResult;
use crate::clipboard::CommandClipboard;
use crate::constants::{APP_NAME, DEFAULT_PANEL_HEIGHT, DEFAULT_PANEL_WIDTH};
use crate::controller::{Controller, Overlay, StatusKind, Ticket, UiState};
use crate::error::AppError;
use crate::export;
use crate::pipeline;
use crate::preview::{Background, PreviewState, TypesetJob};
use crate::queue::TypesetQueue;
use crate::session::SessionManager;
use crate::settings::{FileStore, ImageSettings, SettingsStore};
use crate::typeset::{missing_tools, LatexTypesetter};
use crate::ui::dialogs;
use adw::prelude::*;
use adw::{Application, ApplicationWindow, HeaderBar, ToastOverlay, WindowTitle};
use gtk4::{gdk, Button, Entry, Label, Orientation, Picture, ScrolledWindow};
use sourceview5::prelude::*;
use sourceview5::{Buffer, LanguageManager, View};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const CHECKERBOARD_CSS: &str = "
.checkerboard {
  background-color: #ffffff;
  background-image:
    linear-gradient(45deg, #cccccc 25%, transparent 25%),
    linear-gradient(-45deg, #cccccc 25%, transparent 25%),
    linear-gradient(45deg, transparent 75%, #cccccc 75%),
    linear-gradient(-45deg, transparent 75%, #cccccc 75%);
  background-size: 16px 16px;
  background-position: 0 0, 0 8px, 8px -8px, -8px 0;
}
";

const STATUS_CLASSES: [&str; 3] = ["dim-label", "success", "error"];

struct Widgets {
    window: ApplicationWindow,
    toasts: ToastOverlay,
    title: WindowTitle,
    editor: Buffer,
    preview: Picture,
    preview_frame: gtk4::Frame,
    placeholder: Label,
    busy_box: gtk4::Box,
    busy_spinner: gtk4::Spinner,
    busy_label: Label,
    status: Label,
    draw_btn: Button,
    screenshot_btn: Button,
    record_btn: Button,
    stop_btn: Button,
    ask_entry: Entry,
    ask_btn: Button,
    copy_btn: Button,
    download_btn: Button,
    clear_btn: Button,
    settings_btn: Button,
}

#[derive(Clone)]
struct Panel {
    controller: Rc<RefCell<Controller>>,
    widgets: Rc<Widgets>,
    queue: Rc<TypesetQueue>,
    recorder: Rc<RefCell<AudioRecorder>>,
    store: Rc<RefCell<FileStore>>,
    selector: Rc<SlurpSelector>,
    capturer: Arc<GrimCapturer>,
    crop_events: mpsc::UnboundedSender<SelectorEvent>,
    /// Preview generation and settings the picture was last drawn with.
    rendered: Rc<RefCell<Option<(u64, ImageSettings)>>>,
    /// Set while the editor is rewritten from controller state.
    updating_editor: Rc<Cell<bool>>,
}

fn icon_button(icon: &str, label: &str) -> Button {
    let content = adw::ButtonContent::builder()
        .icon_name(icon)
        .label(label)
        .build();
    Button::builder().child(&content).build()
}

fn load_css() {
    let provider = gtk4::CssProvider::new();
    provider.load_from_string(CHECKERBOARD_CSS);
    if let Some(display) = gdk::Display::default() {
        gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        );
    }
}

fn create_widgets(app: &Application) -> Widgets {
    let window = ApplicationWindow::builder()
        .application(app)
        .default_width(DEFAULT_PANEL_WIDTH)
        .default_height(DEFAULT_PANEL_HEIGHT)
        .title(APP_NAME)
        .build();

    let toasts = ToastOverlay::new();
    window.set_content(Some(&toasts));

    let content_box = gtk4::Box::new(Orientation::Vertical, 0);
    toasts.set_child(Some(&content_box));

    let header_bar = HeaderBar::new();
    let title = WindowTitle::new(APP_NAME, "");
    header_bar.set_title_widget(Some(&title));
    let settings_btn = Button::builder()
        .icon_name("emblem-system-symbolic")
        .tooltip_text("Image Settings")
        .build();
    header_bar.pack_end(&settings_btn);
    content_box.append(&header_bar);

    let body = gtk4::Box::new(Orientation::Vertical, 12);
    body.set_margin_start(12);
    body.set_margin_end(12);
    body.set_margin_top(12);
    body.set_margin_bottom(12);
    let body_scroll = ScrolledWindow::builder()
        .child(&body)
        .hexpand(true)
        .vexpand(true)
        .hscrollbar_policy(gtk4::PolicyType::Never)
        .build();
    content_box.append(&body_scroll);

    // Capture sources
    let capture_row = gtk4::Box::new(Orientation::Horizontal, 0);
    capture_row.add_css_class("linked");
    capture_row.set_homogeneous(true);
    let draw_btn = icon_button("document-edit-symbolic", "Draw");
    let screenshot_btn = icon_button("camera-photo-symbolic", "Crop");
    let record_btn = icon_button("audio-input-microphone-symbolic", "Record");
    let stop_btn = icon_button("media-playback-stop-symbolic", "Stop");
    stop_btn.add_css_class("destructive-action");
    capture_row.append(&draw_btn);
    capture_row.append(&screenshot_btn);
    capture_row.append(&record_btn);
    capture_row.append(&stop_btn);
    body.append(&capture_row);

    let ask_row = gtk4::Box::new(Orientation::Horizontal, 6);
    let ask_entry = Entry::builder()
        .placeholder_text("Ask for a formula, e.g. the quadratic formula")
        .hexpand(true)
        .build();
    let ask_btn = Button::with_label("Ask");
    ask_row.append(&ask_entry);
    ask_row.append(&ask_btn);
    body.append(&ask_row);

    // Editor
    let lang_manager = LanguageManager::default();
    let editor = Buffer::new(None);
    editor.set_language(lang_manager.language("latex").as_ref());
    editor.set_highlight_syntax(true);
    editor.set_enable_undo(true);

    let editor_view = View::with_buffer(&editor);
    editor_view.set_monospace(true);
    editor_view.set_wrap_mode(gtk4::WrapMode::WordChar);
    editor_view.set_top_margin(6);
    editor_view.set_bottom_margin(6);
    editor_view.set_left_margin(6);
    let editor_scroll = ScrolledWindow::builder()
        .child(&editor_view)
        .hexpand(true)
        .min_content_height(120)
        .build();
    let editor_frame = gtk4::Frame::new(None);
    editor_frame.set_child(Some(&editor_scroll));
    body.append(&editor_frame);

    // Preview with the busy overlay on top
    let preview = Picture::new();
    preview.set_can_shrink(true);
    preview.set_content_fit(gtk4::ContentFit::ScaleDown);
    let placeholder = Label::new(Some("Your rendered equation will appear here."));
    placeholder.add_css_class("dim-label");
    placeholder.set_margin_top(24);
    placeholder.set_margin_bottom(24);

    let preview_box = gtk4::Box::new(Orientation::Vertical, 0);
    preview_box.set_valign(gtk4::Align::Center);
    preview_box.append(&placeholder);
    preview_box.append(&preview);

    let busy_spinner = gtk4::Spinner::new();
    let busy_label = Label::new(None);
    let busy_box = gtk4::Box::new(Orientation::Vertical, 6);
    busy_box.set_halign(gtk4::Align::Center);
    busy_box.set_valign(gtk4::Align::Center);
    busy_box.add_css_class("osd");
    busy_box.add_css_class("card");
    busy_box.set_margin_top(12);
    busy_box.set_margin_bottom(12);
    busy_box.append(&busy_spinner);
    busy_box.append(&busy_label);

    let preview_overlay = gtk4::Overlay::new();
    preview_overlay.set_child(Some(&preview_box));
    preview_overlay.add_overlay(&busy_box);
    preview_overlay.set_size_request(-1, 160);

    let preview_frame = gtk4::Frame::new(None);
    preview_frame.set_child(Some(&preview_overlay));
    body.append(&preview_frame);

    // Export actions
    let action_row = gtk4::Box::new(Orientation::Horizontal, 6);
    action_row.set_homogeneous(true);
    let copy_btn = icon_button("edit-copy-symbolic", "Copy");
    copy_btn.add_css_class("suggested-action");
    let download_btn = icon_button("folder-download-symbolic", "Download");
    let clear_btn = icon_button("edit-clear-all-symbolic", "Clear");
    action_row.append(&copy_btn);
    action_row.append(&download_btn);
    action_row.append(&clear_btn);
    body.append(&action_row);

    let status = Label::new(None);
    status.set_wrap(true);
    status.set_xalign(0.0);
    body.append(&status);

    Widgets {
        window,
        toasts,
        title,
        editor,
        preview,
        preview_frame,
        placeholder,
        busy_box,
        busy_spinner,
        busy_label,
        status,
        draw_btn,
        screenshot_btn,
        record_btn,
        stop_btn,
        ask_entry,
        ask_btn,
        copy_btn,
        download_btn,
        clear_btn,
        settings_btn,
    }
}

impl Panel {
    /// Re-projects the controller state onto every widget.
    fn sync(&self) {
        let (ui, text, cursor) = {
            let controller = self.controller.borrow();
            self.refresh_preview(&controller);
            (
                controller.ui_state(),
                controller.buffer().to_string(),
                controller.state().selection.0,
            )
        };
        self.project(&ui);

        let editor = &self.widgets.editor;
        let current = editor.text(&editor.start_iter(), &editor.end_iter(), false);
        if current.as_str() != text {
            self.updating_editor.set(true);
            editor.set_text(&text);
            let iter = editor.iter_at_offset(cursor as i32);
            editor.place_cursor(&iter);
            self.updating_editor.set(false);
        }
    }

    fn project(&self, ui: &UiState) {
        let w = &self.widgets;
        for button in [&w.draw_btn, &w.screenshot_btn, &w.record_btn, &w.ask_btn] {
            button.set_sensitive(ui.capture_enabled);
        }
        w.ask_entry.set_sensitive(ui.capture_enabled);
        w.record_btn.set_visible(!ui.stop_enabled);
        w.stop_btn.set_visible(ui.stop_enabled);
        w.stop_btn.set_sensitive(ui.stop_enabled);
        w.copy_btn.set_sensitive(ui.export_enabled);
        w.download_btn.set_sensitive(ui.export_enabled);

        w.placeholder.set_visible(ui.placeholder_visible);
        w.preview.set_visible(!ui.placeholder_visible);
        match ui.presentation.background {
            Background::Checkerboard => w.preview_frame.add_css_class("checkerboard"),
            Background::Solid(_) => w.preview_frame.remove_css_class("checkerboard"),
        }

        match ui.overlay {
            Overlay::Hidden => {
                w.busy_box.set_visible(false);
                w.busy_spinner.stop();
            }
            Overlay::Loading => {
                w.busy_box.set_visible(true);
                w.busy_spinner.start();
                w.busy_label.set_text("Processing with the local model...");
            }
            Overlay::Recording => {
                w.busy_box.set_visible(true);
                w.busy_spinner.start();
                w.busy_label.set_text("Recording...");
            }
        }

        w.title.set_subtitle(ui.model_status);

        for class in STATUS_CLASSES {
            w.status.remove_css_class(class);
        }
        match &ui.status {
            None => w.status.set_visible(false),
            Some(message) => {
                w.status.set_text(&message.text);
                w.status.add_css_class(match message.kind {
                    StatusKind::Info => "dim-label",
                    StatusKind::Success => "success",
                    StatusKind::Error => "error",
                });
                w.status.set_visible(true);
            }
        }
    }

    /// Draws the typeset SVG with the current settings. A pending preview
    /// keeps showing the previous picture.
    fn refresh_preview(&self, controller: &Controller) {
        let preview = controller.preview();
        if preview.state() == &PreviewState::Pending {
            return;
        }
        let key = (preview.generation(), controller.settings().clone());
        if self.rendered.borrow().as_ref() == Some(&key) {
            return;
        }

        let texture = preview.svg().and_then(|svg| {
            match export::render_svg(svg, controller.settings()) {
                Ok(artifact) => gdk::Texture::from_bytes(&glib::Bytes::from_owned(artifact.png))
                    .map_err(|e| tracing::warn!("Preview texture failed: {}", e))
                    .ok(),
                Err(e) => {
                    tracing::warn!("Preview render failed: {}", e);
                    None
                }
            }
        });
        self.widgets.preview.set_paintable(texture.as_ref());
        *self.rendered.borrow_mut() = Some(key);
    }

    fn enqueue(&self, job: Option<TypesetJob>) {
        if let Some(job) = job {
            if !self.queue.enqueue(job) {
                tracing::error!("Typeset worker is gone, preview will not update");
            }
        }
    }

    fn toast(&self, message: &str) {
        self.widgets.toasts.add_toast(adw::Toast::new(message));
    }

    /// Prompts the model with `capture` and applies the result.
    fn run_capture(&self, ticket: Ticket, capture: CaptureResult) {
        let panel = self.clone();
        glib::MainContext::default().spawn_local(async move {
            let sessions = panel.controller.borrow().sessions().clone();
            let result = pipeline::process(&sessions, capture).await;
            let job = panel.controller.borrow_mut().finish_capture(ticket, result);
            panel.enqueue(job);
            panel.sync();
        });
    }

    /// The audio session must be ready before the microphone opens.
    fn start_recording(&self) {
        let Some(ticket) = self.controller.borrow_mut().request_recording() else {
            return;
        };
        self.sync();
        let panel = self.clone();
        glib::MainContext::default().spawn_local(async move {
            let sessions = panel.controller.borrow().sessions().clone();
            let ready = pipeline::prepare_audio(&sessions).await;
            {
                let mut recorder = panel.recorder.borrow_mut();
                panel
                    .controller
                    .borrow_mut()
                    .begin_recording(ticket, ready, &mut recorder);
            }
            panel.sync();
        });
    }

    fn run_screenshot(&self, ticket: Ticket, crop: CropData) {
        let panel = self.clone();
        let capturer = Arc::clone(&self.capturer);
        glib::MainContext::default().spawn_local(async move {
            let captured = tokio::task::spawn_blocking(move || {
                pipeline::capture_region(capturer.as_ref(), &crop)
            })
            .await
            .unwrap_or_else(|e| {
                Err(AppError::Platform(format!("Screen capture task failed: {}", e)))
            });

            let result = match captured {
                Ok(Some(capture)) => {
                    let sessions = panel.controller.borrow().sessions().clone();
                    pipeline::process(&sessions, capture).await
                }
                Ok(None) => {
                    panel.controller.borrow_mut().cancel_capture(ticket);
                    panel.sync();
                    return;
                }
                Err(e) => Err(e),
            };
            let job = panel.controller.borrow_mut().finish_capture(ticket, result);
            panel.enqueue(job);
            panel.sync();
        });
    }

    fn ask(&self) {
        let question = self.widgets.ask_entry.text().to_string();
        let started = self.controller.borrow_mut().ask(&question);
        if let Some((ticket, capture)) = started {
            self.widgets.ask_entry.set_text("");
            self.run_capture(ticket, capture);
        }
        self.sync();
    }

    fn open_drawing_pad(&self) {
        let panel = self.clone();
        let on_submit: Rc<dyn Fn(&mut crate::capture::drawing::DrawingCanvas)> =
            Rc::new(move |canvas| {
                let started = panel.controller.borrow_mut().submit_drawing(canvas);
                if let Some((ticket, capture)) = started {
                    panel.run_capture(ticket, capture);
                }
                panel.sync();
            });
        if let Err(e) = dialogs::show_drawing_pad(&self.widgets.window, on_submit) {
            tracing::error!("Could not open drawing pad: {}", e);
            self.toast(&format!("Could not open drawing pad: {}", e));
        }
    }

    fn open_settings(&self) {
        let panel = self.clone();
        let current = self.controller.borrow().settings().clone();
        dialogs::show_settings(
            &self.widgets.window,
            &current,
            Rc::new(move |settings| {
                let job = {
                    let mut store = panel.store.borrow_mut();
                    panel
                        .controller
                        .borrow_mut()
                        .save_settings(settings, &mut *store)
                };
                panel.enqueue(job);
                panel.sync();
            }),
        );
    }

    fn connect_signals(&self) {
        let w = &self.widgets;

        w.editor.connect_changed(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |buf| {
                if panel.updating_editor.get() {
                    return;
                }
                let text = buf.text(&buf.start_iter(), &buf.end_iter(), false);
                let job = panel.controller.borrow_mut().set_latex(text.as_str());
                panel.enqueue(job);
                panel.sync();
            }
        ));

        w.editor.connect_cursor_position_notify(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |buf| {
                if panel.updating_editor.get() {
                    return;
                }
                let (start, end) = buf
                    .selection_bounds()
                    .map(|(a, b)| (a.offset(), b.offset()))
                    .unwrap_or_else(|| (buf.cursor_position(), buf.cursor_position()));
                panel
                    .controller
                    .borrow_mut()
                    .set_selection(start.max(0) as usize, end.max(0) as usize);
            }
        ));

        w.draw_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| panel.open_drawing_pad()
        ));

        w.screenshot_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                let events = panel.crop_events.clone();
                panel
                    .controller
                    .borrow_mut()
                    .start_crop(panel.selector.as_ref(), events);
                panel.sync();
            }
        ));

        w.record_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| panel.start_recording()
        ));

        w.stop_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                let started = {
                    let mut recorder = panel.recorder.borrow_mut();
                    panel.controller.borrow_mut().end_recording(&mut recorder)
                };
                if let Some((ticket, capture)) = started {
                    panel.run_capture(ticket, capture);
                }
                panel.sync();
            }
        ));

        w.ask_entry.connect_activate(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| panel.ask()
        ));
        w.ask_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| panel.ask()
        ));

        w.copy_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                panel.controller.borrow_mut().copy(&CommandClipboard);
                panel.sync();
            }
        ));

        w.download_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                let dir = dirs::download_dir()
                    .or_else(dirs::home_dir)
                    .unwrap_or_else(|| PathBuf::from("."));
                let saved = panel.controller.borrow_mut().download(&dir);
                if let Some(path) = saved {
                    tracing::info!(path = %path.display(), "Image downloaded");
                }
                panel.sync();
            }
        ));

        w.clear_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                let job = panel.controller.borrow_mut().clear();
                panel.enqueue(job);
                panel.sync();
            }
        ));

        w.settings_btn.connect_clicked(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| panel.open_settings()
        ));

        w.window.connect_close_request(glib::clone!(
            #[strong(rename_to = panel)]
            self,
            move |_| {
                panel.controller.borrow().sessions().destroy_all();
                glib::Propagation::Proceed
            }
        ));
    }
}

/// Builds the panel window and starts its background loops.
pub fn build_panel(app: &Application, sessions: SessionManager) {
    load_css();

    let store = FileStore::default_location();
    let settings = store.load_image_settings().unwrap_or_else(|e| {
        tracing::warn!("Using default image settings: {}", e);
        ImageSettings::default()
    });

    let (queue, mut outcomes) = TypesetQueue::new(Arc::new(LatexTypesetter::new()));
    let (crop_events, mut crop_rx) = mpsc::unbounded_channel::<SelectorEvent>();

    let panel = Panel {
        controller: Rc::new(RefCell::new(Controller::new(sessions.clone(), settings))),
        widgets: Rc::new(create_widgets(app)),
        queue: Rc::new(queue),
        recorder: Rc::new(RefCell::new(AudioRecorder::new(Box::new(
            ArecordMicrophone::new(),
        )))),
        store: Rc::new(RefCell::new(store)),
        selector: Rc::new(SlurpSelector::default()),
        capturer: Arc::new(GrimCapturer),
        crop_events,
        rendered: Rc::new(RefCell::new(None)),
        updating_editor: Rc::new(Cell::new(false)),
    };
    panel.connect_signals();
    panel.sync();

    let missing = missing_tools();
    if !missing.is_empty() {
        let msg = format!(
            "Missing dependencies: {}. Preview may not work.",
            missing.join(", ")
        );
        panel.toast(&msg);
        tracing::warn!("{}", msg);
    }

    let ctx = glib::MainContext::default();

    ctx.spawn_local(glib::clone!(
        #[strong]
        panel,
        async move {
            let status = sessions.initialize().await;
            panel.controller.borrow_mut().model_probed();
            if !status.is_available() {
                let service = panel.controller.borrow().sessions().service_name().to_string();
                panel.toast(&format!(
                    "{} model unavailable ({}). Capture is disabled.",
                    service, status
                ));
            }
            panel.sync();
        }
    ));

    ctx.spawn_local(glib::clone!(
        #[strong]
        panel,
        async move {
            while let Some(outcome) = outcomes.recv().await {
                let applied = panel.controller.borrow_mut().apply_typeset(outcome);
                if applied {
                    panel.sync();
                }
            }
        }
    ));

    ctx.spawn_local(glib::clone!(
        #[strong]
        panel,
        async move {
            while let Some(event) = crop_rx.recv().await {
                let started = panel.controller.borrow_mut().crop_complete(event);
                if let Some((ticket, crop)) = started {
                    panel.run_screenshot(ticket, crop);
                }
                panel.sync();
            }
        }
    ));

    glib::timeout_add_local(
        Duration::from_millis(200),
        glib::clone!(
            #[strong]
            panel,
            move || {
                let expired = panel.controller.borrow_mut().tick(Instant::now());
                if expired {
                    panel.sync();
                }
                glib::ControlFlow::Continue
            }
        ),
    );

    panel.widgets.window.present();
}
