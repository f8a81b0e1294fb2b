//! Queue binding of the CM data-change listener.

use queue_connector::QueueDef;

/// Queue CM data-change notifications are diverted to.
pub struct CmDataChangeDivertedQueue;

impl QueueDef for CmDataChangeDivertedQueue {
    const QUEUE_NAME: &'static str = "CmDataChangeDivertedQueue";
    const DESTINATION_URI: &'static str = "jms:/queue/CmDataChangeDivertedQueue";
    const ACK_THRESHOLD: u64 = 2000;
}
