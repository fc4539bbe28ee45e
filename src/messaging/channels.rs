// Communication channels lock-free

use ringbuf::{HeapRb, traits::Split};

use crate::messaging::event::{Event, MixerEvent};
use crate::messaging::notification::Notification;
use crate::midi::sync::{SyncConsumer, SyncMessage, SyncProducer};

pub const EVENT_QUEUE_CAPACITY: usize = 1024;
pub const MIXER_EVENT_QUEUE_CAPACITY: usize = 64;
pub const SYNC_QUEUE_CAPACITY: usize = 4096;

pub type EventProducer = ringbuf::HeapProd<Event>;
pub type EventConsumer = ringbuf::HeapCons<Event>;

pub fn create_event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let rb = HeapRb::<Event>::new(capacity);
    rb.split()
}

pub type MixerEventProducer = ringbuf::HeapProd<MixerEvent>;
pub type MixerEventConsumer = ringbuf::HeapCons<MixerEvent>;

pub fn create_mixer_event_channel(capacity: usize) -> (MixerEventProducer, MixerEventConsumer) {
    let rb = HeapRb::<MixerEvent>::new(capacity);
    rb.split()
}

pub fn create_sync_channel(capacity: usize) -> (SyncProducer, SyncConsumer) {
    let rb = HeapRb::<SyncMessage>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<Notification>;
pub type NotificationConsumer = ringbuf::HeapCons<Notification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<Notification>::new(capacity);
    rb.split()
}
