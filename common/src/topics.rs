pub const TOPIC_SENSOR_FILTER: &str = "UCL/OPS/107/EM/gosund/#";
pub const TOPIC_SENSOR_PREFIX: &str = "UCL/OPS/107/EM/gosund";

pub const TOPIC_MARKER_LAST_WILL: &str = "LWT";
pub const TOPIC_MARKER_TELEMETRY: &str = "SENSOR";

pub const TOPIC_MACHINE_STATE: &str = "marble/machine/state";

pub const TOPIC_CMD_BUTTON1: &str = "marble/cmnd/button1";
pub const TOPIC_CMD_BUTTON2: &str = "marble/cmnd/button2";
pub const TOPIC_CMD_TOUCH: &str = "marble/cmnd/touch";

/// Device name is the second-to-last `/` segment, e.g. `.../tele/plug-a/SENSOR`.
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let (head, _) = topic.rsplit_once('/')?;
    let device = head.rsplit('/').next()?;
    (!device.is_empty()).then_some(device)
}
