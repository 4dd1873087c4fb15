use iocraft::prelude::*;
use tokio::sync::watch;

use mpup::{CompletedUpload, UploadProgress};

const BAR_WIDTH: usize = 40;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<UploadProgress>>,
}

#[component]
pub fn ProgressBar(
    props: &mut ProgressBarProps,
    mut hooks: Hooks,
) -> impl Into<AnyElement<'static>> {
    let mut snapshot = hooks.use_state(UploadProgress::default);
    let progress = props.progress.take();

    hooks.use_future(async move {
        if let Some(mut progress) = progress {
            while progress.changed().await.is_ok() {
                let latest = progress.borrow_and_update().clone();
                snapshot.set(latest);
            }
        }
    });

    let snapshot = snapshot.read().clone();
    let percent = snapshot.percent();
    let filled = (((percent / 100.0) * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);

    element! {
        View(flex_direction: FlexDirection::Column) {
            Text(weight: Weight::Bold, content: props.title.clone())
            View(flex_direction: FlexDirection::Row) {
                Text(color: Color::Green, content: "█".repeat(filled))
                Text(color: Color::DarkGrey, content: "░".repeat(BAR_WIDTH - filled))
                Text(content: format!(
                    " {:>5.1}%  part {}/{}",
                    percent, snapshot.parts_completed, snapshot.total_parts
                ))
            }
        }
    }
}

#[derive(Default, Props)]
pub struct SuccessMessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &SuccessMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct ErrorMessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &ErrorMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "✗ ")
            Text(content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct UploadSummaryProps {
    pub upload: Option<CompletedUpload>,
}

#[component]
pub fn UploadSummary(props: &UploadSummaryProps) -> impl Into<AnyElement<'static>> {
    let rows = match &props.upload {
        Some(upload) => vec![
            ("Object", upload.target.to_string()),
            ("Upload ID", upload.upload_id.clone()),
            ("Parts", upload.part_count.to_string()),
            (
                "ETag",
                upload.etag.clone().unwrap_or("<none>".to_string()),
            ),
            (
                "Location",
                upload.location.clone().unwrap_or("<none>".to_string()),
            ),
        ],
        None => Vec::new(),
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            #(rows.into_iter().map(|(label, value)| {
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        Text(weight: Weight::Bold, content: format!("│ {:<10}", label))
                        Text(content: value)
                    }
                }
            }))
        }
    }
}
