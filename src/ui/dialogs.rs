use crate::capture::drawing::DrawingCanvas;
use crate::capture::CaptureError;
use crate::settings::ImageSettings;
use adw::prelude::*;
use adw::{EntryRow, PreferencesGroup, PreferencesPage, PreferencesWindow, SwitchRow};
use gtk4::{gdk, Button, Orientation, Picture};
use std::cell::RefCell;
use std::rc::Rc;

fn texture(canvas: &DrawingCanvas) -> gdk::MemoryTexture {
    let bytes = glib::Bytes::from_owned(canvas.data().to_vec());
    gdk::MemoryTexture::new(
        canvas.width() as i32,
        canvas.height() as i32,
        gdk::MemoryFormat::R8g8b8a8Premultiplied,
        &bytes,
        canvas.width() as usize * 4,
    )
}

fn paint(picture: &Picture, canvas: &DrawingCanvas) {
    picture.set_paintable(Some(&texture(canvas)));
}

/// Opens the freehand drawing pad. `on_submit` receives the canvas when the
/// user submits; the pad closes afterwards.
pub fn show_drawing_pad(
    parent: &impl IsA<gtk4::Window>,
    on_submit: Rc<dyn Fn(&mut DrawingCanvas)>,
) -> Result<(), CaptureError> {
    let canvas = Rc::new(RefCell::new(DrawingCanvas::new()?));

    let window = gtk4::Window::builder()
        .transient_for(parent)
        .modal(true)
        .title("Draw an equation")
        .resizable(false)
        .build();

    let vbox = gtk4::Box::new(Orientation::Vertical, 12);
    vbox.set_margin_start(12);
    vbox.set_margin_end(12);
    vbox.set_margin_top(12);
    vbox.set_margin_bottom(12);
    window.set_child(Some(&vbox));

    let picture = Picture::new();
    picture.set_can_shrink(false);
    picture.set_halign(gtk4::Align::Start);
    picture.set_valign(gtk4::Align::Start);
    {
        let canvas = canvas.borrow();
        picture.set_size_request(canvas.width() as i32, canvas.height() as i32);
        paint(&picture, &canvas);
    }
    let frame = gtk4::Frame::new(None);
    frame.set_child(Some(&picture));
    vbox.append(&frame);

    let drag = gtk4::GestureDrag::new();
    drag.connect_drag_begin(glib::clone!(
        #[strong]
        canvas,
        #[weak]
        picture,
        move |_, x, y| {
            canvas.borrow_mut().pointer_down(x as f32, y as f32);
            paint(&picture, &canvas.borrow());
        }
    ));
    drag.connect_drag_update(glib::clone!(
        #[strong]
        canvas,
        #[weak]
        picture,
        move |gesture, dx, dy| {
            if let Some((x, y)) = gesture.start_point() {
                canvas
                    .borrow_mut()
                    .pointer_move((x + dx) as f32, (y + dy) as f32);
                paint(&picture, &canvas.borrow());
            }
        }
    ));
    drag.connect_drag_end(glib::clone!(
        #[strong]
        canvas,
        move |_, _, _| canvas.borrow_mut().pointer_up()
    ));
    picture.add_controller(drag);

    let buttons = gtk4::Box::new(Orientation::Horizontal, 6);
    buttons.set_halign(gtk4::Align::End);
    let clear_btn = Button::with_label("Clear");
    let cancel_btn = Button::with_label("Cancel");
    let submit_btn = Button::with_label("Submit");
    submit_btn.add_css_class("suggested-action");
    buttons.append(&clear_btn);
    buttons.append(&cancel_btn);
    buttons.append(&submit_btn);
    vbox.append(&buttons);

    clear_btn.connect_clicked(glib::clone!(
        #[strong]
        canvas,
        #[weak]
        picture,
        move |_| {
            canvas.borrow_mut().clear();
            paint(&picture, &canvas.borrow());
        }
    ));
    cancel_btn.connect_clicked(glib::clone!(
        #[weak]
        window,
        move |_| window.close()
    ));
    submit_btn.connect_clicked(glib::clone!(
        #[strong]
        canvas,
        #[weak]
        window,
        move |_| {
            on_submit(&mut canvas.borrow_mut());
            window.close();
        }
    ));

    window.present();
    Ok(())
}

/// Image settings form. `on_save` receives the parsed values.
pub fn show_settings(
    parent: &impl IsA<gtk4::Window>,
    current: &ImageSettings,
    on_save: Rc<dyn Fn(ImageSettings)>,
) {
    let window = PreferencesWindow::builder()
        .transient_for(parent)
        .modal(true)
        .title("Image Settings")
        .default_width(420)
        .build();

    let page = PreferencesPage::new();
    page.set_title("Export");
    page.set_icon_name(Some("image-x-generic-symbolic"));
    window.add(&page);

    let group = PreferencesGroup::new();
    group.set_title("Preview and PNG");
    group.set_description(Some("Applied to the live preview and to copied or downloaded images"));
    page.add(&group);

    let padding_row = EntryRow::builder().title("Padding (px)").build();
    padding_row.set_text(&current.padding.to_string());
    let scale_row = EntryRow::builder().title("Scale").build();
    scale_row.set_text(&current.scale.to_string());
    let font_row = EntryRow::builder().title("Font color").build();
    font_row.set_text(&current.font_color);
    let bg_row = EntryRow::builder().title("Background color").build();
    bg_row.set_text(&current.bg_color);
    let transparent_row = SwitchRow::builder()
        .title("Transparent background")
        .active(current.transparent)
        .build();

    group.add(&padding_row);
    group.add(&scale_row);
    group.add(&font_row);
    group.add(&bg_row);
    group.add(&transparent_row);

    let save_btn = Button::builder()
        .label("Save")
        .valign(gtk4::Align::Center)
        .build();
    save_btn.add_css_class("suggested-action");
    group.set_header_suffix(Some(&save_btn));

    save_btn.connect_clicked(glib::clone!(
        #[weak]
        window,
        #[weak]
        padding_row,
        #[weak]
        scale_row,
        #[weak]
        font_row,
        #[weak]
        bg_row,
        #[weak]
        transparent_row,
        move |_| {
            let settings = ImageSettings::from_form(
                &padding_row.text(),
                &scale_row.text(),
                &font_row.text(),
                &bg_row.text(),
                transparent_row.is_active(),
            );
            on_save(settings);
            window.close();
        }
    ));

    window.present();
}
