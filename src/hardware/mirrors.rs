//! Mirror screw axes.
//!
//! Each of the two interferometer mirrors has an x and a y screw driven by
//! one motor. Screw positions are tracked in normalised units in `[-1, 1]`
//! and converted to motor steps with `max_screw_value`.

use crate::config::MotorSettings;
use crate::error::AppResult;
use crate::hardware::capabilities::MotorController;
use std::sync::Arc;
use std::time::Duration;

/// One mirror screw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorAxis {
    /// Mirror 1, horizontal screw
    Mirror1X,
    /// Mirror 1, vertical screw
    Mirror1Y,
    /// Mirror 2, horizontal screw
    Mirror2X,
    /// Mirror 2, vertical screw
    Mirror2Y,
}

impl MirrorAxis {
    /// All axes in index order.
    pub const ALL: [MirrorAxis; 4] = [
        MirrorAxis::Mirror1X,
        MirrorAxis::Mirror1Y,
        MirrorAxis::Mirror2X,
        MirrorAxis::Mirror2Y,
    ];

    fn index(self) -> usize {
        match self {
            MirrorAxis::Mirror1X => 0,
            MirrorAxis::Mirror1Y => 1,
            MirrorAxis::Mirror2X => 2,
            MirrorAxis::Mirror2Y => 3,
        }
    }
}

/// Normalised screw positions of both mirrors, driving a [`MotorController`].
pub struct MirrorAxes<M: MotorController> {
    motors: Arc<M>,
    motor_ids: [u8; 4],
    max_screw_value: i64,
    positions: [f64; 4],
}

impl<M: MotorController> std::fmt::Debug for MirrorAxes<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorAxes")
            .field("motor_ids", &self.motor_ids)
            .field("max_screw_value", &self.max_screw_value)
            .field("positions", &self.positions)
            .finish()
    }
}

impl<M: MotorController> MirrorAxes<M> {
    /// Map the four screws to motors as configured. Positions start at 0.
    pub fn new(motors: Arc<M>, settings: &MotorSettings) -> Self {
        Self {
            motors,
            motor_ids: [
                settings.mirror1_x,
                settings.mirror1_y,
                settings.mirror2_x,
                settings.mirror2_y,
            ],
            max_screw_value: settings.max_screw_value,
            positions: [0.0; 4],
        }
    }

    /// Motor id driving `axis`.
    pub fn motor_id(&self, axis: MirrorAxis) -> u8 {
        self.motor_ids[axis.index()]
    }

    /// Normalised position of `axis`.
    pub fn position(&self, axis: MirrorAxis) -> f64 {
        self.positions[axis.index()]
    }

    /// Load every axis position from the controller's stored home position.
    pub async fn load_home_positions(&mut self) -> AppResult<()> {
        for axis in MirrorAxis::ALL {
            let home = self.motors.home_position(self.motor_id(axis)).await?;
            self.positions[axis.index()] =
                (home as f64 / self.max_screw_value as f64).clamp(-1.0, 1.0);
        }
        tracing::debug!(positions = ?self.positions, "Mirror axes loaded from home");
        Ok(())
    }

    /// Shift `axis` by `delta` normalised units and move its motor.
    ///
    /// The position is clamped to `[-1, 1]`; the step target is truncated
    /// toward zero. Returns the commanded step target.
    pub async fn apply_normalized(&mut self, axis: MirrorAxis, delta: f64) -> AppResult<i64> {
        let position = (self.position(axis) + delta).clamp(-1.0, 1.0);
        let steps = (position * self.max_screw_value as f64).trunc() as i64;
        self.motors
            .move_absolute(self.motor_id(axis), steps)
            .await?;
        self.positions[axis.index()] = position;
        Ok(steps)
    }

    /// Wait until every mirror motor reports motion done.
    pub async fn wait_for_motors(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> AppResult<()> {
        for motor_id in self.motor_ids {
            self.motors
                .wait_until_idle(motor_id, poll_interval, timeout)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockMotorController;

    fn settings() -> MotorSettings {
        MotorSettings::default()
    }

    #[tokio::test]
    async fn test_apply_normalized_clamps_and_truncates() {
        let motors = Arc::new(MockMotorController::new());
        let mut axes = MirrorAxes::new(Arc::clone(&motors), &settings());

        let steps = axes.apply_normalized(MirrorAxis::Mirror1Y, 0.33337).await.unwrap();
        assert_eq!(steps, 3333);
        assert_eq!(motors.position(2).await.unwrap(), 3333);

        let steps = axes.apply_normalized(MirrorAxis::Mirror1Y, 5.0).await.unwrap();
        assert_eq!(steps, 10_000);
        assert_eq!(axes.position(MirrorAxis::Mirror1Y), 1.0);

        let steps = axes.apply_normalized(MirrorAxis::Mirror2X, -0.00015).await.unwrap();
        assert_eq!(steps, -1);
    }

    #[tokio::test]
    async fn test_load_home_positions() {
        let motors = Arc::new(MockMotorController::with_homes(&[(1, 5000), (4, -2500)]));
        let mut axes = MirrorAxes::new(motors, &settings());

        axes.load_home_positions().await.unwrap();

        assert_eq!(axes.position(MirrorAxis::Mirror1X), 0.5);
        assert_eq!(axes.position(MirrorAxis::Mirror2Y), -0.25);
        assert_eq!(axes.position(MirrorAxis::Mirror1Y), 0.0);
    }

    #[tokio::test]
    async fn test_wait_for_motors_with_mock() {
        let motors = Arc::new(MockMotorController::new());
        let axes = MirrorAxes::new(motors, &settings());
        axes.wait_for_motors(Duration::from_millis(1), Some(Duration::from_millis(100)))
            .await
            .unwrap();
    }
}
