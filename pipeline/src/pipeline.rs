use crate::bus::MessageBus;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::flusher::BatchFlusher;
use crate::forwarder::BusForwarder;
use crate::persister::BufferedPersister;
use crate::poller::Poller;
use crate::pool::WorkerPool;
use crate::queue::DurableQueue;
use crate::source::ReadingSource;
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Every component, built once and wired by ownership.
pub struct Pipeline {
    pub poller: Arc<Poller>,
    pub dispatcher: Arc<Dispatcher>,
    pub forwarder: Arc<BusForwarder>,
    pub persister: Arc<BufferedPersister>,
    pub flusher: Arc<BatchFlusher>,
    poll_interval: Duration,
    flush_delay: Duration,
}

pub struct PipelineTasks {
    pub poller: JoinHandle<()>,
    pub flusher: JoinHandle<()>,
}

impl Pipeline {
    pub fn build(
        config: &Config,
        source: Arc<dyn ReadingSource>,
        bus: Arc<dyn MessageBus>,
        queue: Arc<dyn DurableQueue>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let timeouts = config.timeouts;

        let forwarder = Arc::new(BusForwarder::new(bus, &config.bus_topic, timeouts.send));
        let persister = Arc::new(BufferedPersister::new(
            queue.clone(),
            config.queue_soft_limit,
        ));

        let mut dispatcher = Dispatcher::new(WorkerPool::new(config.pool), timeouts.event);
        dispatcher.subscribe(forwarder.clone());
        dispatcher.subscribe(persister.clone());
        let dispatcher = Arc::new(dispatcher);
        info!(
            "Dispatcher ready: {} subscribers, workers {}..{}, backlog {}",
            dispatcher.subscriber_count(),
            config.pool.min_workers,
            config.pool.max_workers,
            config.pool.backlog
        );

        let poller = Arc::new(Poller::new(source, dispatcher.clone(), timeouts.fetch));
        let flusher = Arc::new(BatchFlusher::new(
            queue,
            store,
            config.batch_size,
            timeouts.commit,
        ));

        Self {
            poller,
            dispatcher,
            forwarder,
            persister,
            flusher,
            poll_interval: config.poll_interval,
            flush_delay: config.flush_delay,
        }
    }

    /// Starts the poller and flusher schedules.
    pub fn spawn(&self) -> PipelineTasks {
        PipelineTasks {
            poller: tokio::spawn(self.poller.clone().run(self.poll_interval)),
            flusher: tokio::spawn(self.flusher.clone().run(self.flush_delay)),
        }
    }
}
