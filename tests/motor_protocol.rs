//! Newport command set and mirror-axis mapping over a recording transport.

use async_trait::async_trait;
use interf_daq::config::MotorSettings;
use interf_daq::error::{AppResult, DaqError, Stage};
use interf_daq::hardware::{CommandTransport, MirrorAxes, MirrorAxis, MotorController, NewportController};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every command and answers queries from a reply table.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, String>>,
}

impl RecordingTransport {
    fn with_replies(replies: &[(&str, &str)]) -> Self {
        let transport = Self::default();
        {
            let mut table = transport.replies.lock().unwrap();
            for (command, reply) in replies {
                table.insert((*command).to_string(), (*reply).to_string());
            }
        }
        transport
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for RecordingTransport {
    async fn command(&self, command: &str) -> AppResult<String> {
        self.sent.lock().unwrap().push(command.to_string());
        if !command.ends_with('?') {
            return Ok(String::new());
        }
        self.replies
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .ok_or_else(|| DaqError::Motor(format!("No reply to '{command}'")))
    }
}

#[tokio::test]
async fn test_command_strings() {
    let transport = RecordingTransport::with_replies(&[
        ("1TP?", "1>1250"),
        ("2DH?", "2>-40\r"),
        ("3PA?", "3>+75"),
        ("4MD?", "4>1"),
    ]);
    let controller = NewportController::new(transport);

    controller.move_relative(1, -15).await.unwrap();
    controller.move_absolute(2, 300).await.unwrap();
    controller.set_home_position(3, 0).await.unwrap();
    assert_eq!(controller.position(1).await.unwrap(), 1250);
    assert_eq!(controller.home_position(2).await.unwrap(), -40);
    assert_eq!(controller.target(3).await.unwrap(), 75);
    assert!(controller.is_done(4).await.unwrap());

    assert_eq!(
        controller.transport().sent(),
        vec!["1PR-15", "2PA300", "3DH0", "1TP?", "2DH?", "3PA?", "4MD?"]
    );
}

#[tokio::test]
async fn test_malformed_reply_is_motor_error() {
    let transport = RecordingTransport::with_replies(&[("1TP?", "1>")]);
    let controller = NewportController::new(transport);

    let err = controller.position(1).await.unwrap_err();
    assert!(matches!(err, DaqError::Motor(_)));
    assert!(err.to_string().contains("1TP?"));
}

#[tokio::test]
async fn test_wait_until_idle_times_out_while_moving() {
    let transport = RecordingTransport::with_replies(&[("2MD?", "2>0")]);
    let controller = NewportController::new(transport);

    let err = controller
        .wait_until_idle(2, Duration::from_millis(5), Some(Duration::from_millis(40)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DaqError::Timeout {
            stage: Stage::Motion,
            ..
        }
    ));
    assert!(controller.transport().sent().len() > 1);
}

#[tokio::test]
async fn test_mirror_axes_drive_newport_commands() {
    let transport = RecordingTransport::with_replies(&[
        ("1DH?", "1>5000"),
        ("2DH?", "2>0"),
        ("3DH?", "3>-2500"),
        ("4DH?", "4>20000"),
        ("1MD?", "1>1"),
        ("2MD?", "2>1"),
        ("3MD?", "3>1"),
        ("4MD?", "4>1"),
    ]);
    let controller = Arc::new(NewportController::new(transport));
    let mut mirrors = MirrorAxes::new(Arc::clone(&controller), &MotorSettings::default());

    mirrors.load_home_positions().await.unwrap();
    assert_eq!(mirrors.position(MirrorAxis::Mirror1X), 0.5);
    assert_eq!(mirrors.position(MirrorAxis::Mirror2X), -0.25);
    // Home beyond the screw range is clamped
    assert_eq!(mirrors.position(MirrorAxis::Mirror2Y), 1.0);

    let target = mirrors
        .apply_normalized(MirrorAxis::Mirror1X, 0.25)
        .await
        .unwrap();
    assert_eq!(target, 7500);
    mirrors
        .wait_for_motors(Duration::from_millis(1), Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let sent = controller.transport().sent();
    assert!(sent.contains(&"1PA7500".to_string()));
    assert_eq!(&sent[sent.len() - 4..], ["1MD?", "2MD?", "3MD?", "4MD?"]);
}
