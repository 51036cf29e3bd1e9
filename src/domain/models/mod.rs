pub mod contact;
pub mod delivery_log;
pub mod enrollment;
pub mod sender;
pub mod sequence;
pub mod step;

pub use contact::Contact;
pub use delivery_log::{DeliveryLogEntry, DeliveryLogKind, NewDeliveryLogEntry};
pub use enrollment::{Enrollment, EnrollmentState, ScheduleSnapshot};
pub use sender::{SenderProfile, SenderSnapshot, SenderStatus};
pub use sequence::{
    SchedulePolicy, ScheduleMode, SendWindow, Sequence, SequenceStatus, StopConditions,
};
pub use step::SequenceStep;
