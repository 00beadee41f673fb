//! In-memory sources and sinks for driving workers without ZeroMQ or PostgreSQL

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowd_collector::endpoint::{FlowSource, TransportError};
use flowd_collector::store::{FlowSink, StoreError, StoreResult};
use flowd_collector::worker::ReceivePolicy;
use flowd_common::types::FlowRecord;
use tokio::sync::mpsc;

/// Flows with this id fail to persist
pub const POISON_ID: &str = "poison";

/// Flows with this id never finish persisting
pub const STALL_ID: &str = "stall";

pub fn test_policy() -> ReceivePolicy {
    ReceivePolicy {
        max_failures: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
    }
}

/// A source fed through a channel; idles like a socket with no producer once
/// the feeding side is gone.
pub struct ChannelSource {
    address: String,
    rx: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    delivered: Arc<AtomicUsize>,
}

/// Test-side handle of a [`ChannelSource`]
#[derive(Clone)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
    delivered: Arc<AtomicUsize>,
}

impl Feed {
    pub fn record(&self, record: &FlowRecord) {
        self.raw(record.encode().unwrap());
    }

    pub fn raw(&self, body: impl Into<Vec<u8>>) {
        self.tx.send(Ok(body.into())).unwrap();
    }

    pub fn error(&self) {
        self.tx
            .send(Err(TransportError::Zmq(zeromq::ZmqError::NoMessage)))
            .unwrap();
    }

    /// Messages and errors the source has handed to its worker so far
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// True once the source half was dropped
    pub fn released(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn channel_source(index: usize) -> (ChannelSource, Feed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let delivered = Arc::new(AtomicUsize::new(0));
    let source = ChannelSource {
        address: format!("mem://producer:{}", 5556 + index),
        rx,
        delivered: Arc::clone(&delivered),
    };
    (source, Feed { tx, delivered })
}

pub fn channel_sources(count: usize) -> (Vec<ChannelSource>, Vec<Feed>) {
    (0..count).map(channel_source).unzip()
}

#[async_trait]
impl FlowSource for ChannelSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.rx.recv().await {
            Some(message) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                message
            },
            None => std::future::pending().await,
        }
    }
}

/// Sink applying the `flow_info` conflict rule in memory.
///
/// Every successful upsert is announced on the channel returned by
/// [`MemorySink::new`].
pub struct MemorySink {
    rows: Mutex<HashMap<String, FlowRecord>>,
    upserted: mpsc::UnboundedSender<String>,
}

impl MemorySink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            upserted: tx,
        });
        (sink, rx)
    }

    pub fn get(&self, id: &str) -> Option<FlowRecord> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl FlowSink for MemorySink {
    async fn upsert(&self, record: &FlowRecord) -> StoreResult<()> {
        match record.id.as_str() {
            POISON_ID => {
                return Err(StoreError::OutOfRange {
                    field: "client_num_pkts",
                    value: u64::MAX,
                })
            },
            STALL_ID => std::future::pending::<()>().await,
            _ => {},
        }

        {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&record.id) {
                Some(row) => {
                    row.last_seen = record.last_seen.clone();
                    row.client_num_pkts = record.client_num_pkts;
                    row.server_num_pkts = record.server_num_pkts;
                    row.client_len_pkts = record.client_len_pkts;
                    row.server_len_pkts = record.server_len_pkts;
                    row.ndpi = record.ndpi.clone();
                },
                None => {
                    rows.insert(record.id.clone(), record.clone());
                },
            }
        }

        let _ = self.upserted.send(record.id.clone());
        Ok(())
    }
}

/// A flow observation with the fields the scenarios look at
pub fn flow(id: &str, src_ip: &str, last_seen: &str, client_num_pkts: u64) -> FlowRecord {
    let mut record = FlowRecord::new(id);
    record.src_ip = src_ip.to_string();
    record.dst_ip = "10.0.0.1".to_string();
    record.src_port = 40000;
    record.dst_port = 443;
    record.ipv = 4;
    record.proto = "TCP".to_string();
    record.first_seen = last_seen.to_string();
    record.last_seen = last_seen.to_string();
    record.client_num_pkts = client_num_pkts;
    record
}
