mod missions;
mod recovery;
mod sync_queue;
