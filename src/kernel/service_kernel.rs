// ServiceKernel - core infrastructure with all dependencies.
//
// The kernel holds every external collaborator behind its trait, plus the
// validated configuration. Domain code takes `&ServiceKernel` instead of
// individual services; tenancy is explicit in every call, there is no
// per-tenant state in here.

use std::sync::Arc;

use super::jobs::JobQueue;
use super::traits::{
    BaseClock, BaseNotificationDispatcher, BaseNotificationStore, BaseSlotStore, BaseWaitlistStore,
};
use crate::config::CoreConfig;

/// ServiceKernel holds all core dependencies.
pub struct ServiceKernel {
    pub slots: Arc<dyn BaseSlotStore>,
    pub waitlist: Arc<dyn BaseWaitlistStore>,
    pub notifications: Arc<dyn BaseNotificationStore>,
    pub dispatcher: Arc<dyn BaseNotificationDispatcher>,
    pub job_queue: Arc<dyn JobQueue>,
    pub clock: Arc<dyn BaseClock>,
    pub config: CoreConfig,
}

impl ServiceKernel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slots: Arc<dyn BaseSlotStore>,
        waitlist: Arc<dyn BaseWaitlistStore>,
        notifications: Arc<dyn BaseNotificationStore>,
        dispatcher: Arc<dyn BaseNotificationDispatcher>,
        job_queue: Arc<dyn JobQueue>,
        clock: Arc<dyn BaseClock>,
        config: CoreConfig,
    ) -> Self {
        Self {
            slots,
            waitlist,
            notifications,
            dispatcher,
            job_queue,
            clock,
            config,
        }
    }
}
