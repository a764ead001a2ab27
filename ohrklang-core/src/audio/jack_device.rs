use std::{
    sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError},
    time::Duration,
};

use jack::PortFlags;
use ndarray::{Array2, ArrayView2};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use super::{DeviceError, DuplexDevice, StopSignal, StreamSettings};

const PORT_TYPE: &str = "32 bit float mono audio";
const POLL_INTERVAL: Duration = Duration::from_millis(10);

impl From<jack::Error> for DeviceError {
    fn from(err: jack::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

enum Message {
    Transaction(Transaction),
    Abort,
}

struct Transaction {
    id: u64,
    output: Array2<f32>,
    input_channels: usize,
    position: usize,
}

/// Sends finished and aborted transactions back to the caller so their
/// buffers are never freed on the process thread. A transaction that does
/// not fit into the channel waits for the next cycle.
struct ReturnSlot {
    pending: Option<Transaction>,
    tx: SyncSender<Transaction>,
}

impl ReturnSlot {
    fn new(tx: SyncSender<Transaction>) -> Self {
        Self { pending: None, tx }
    }

    fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    fn put(&mut self, transaction: Option<Transaction>) {
        if let Some(transaction) = transaction {
            self.pending = Some(transaction);
        }
        self.flush();
    }

    fn flush(&mut self) {
        let Some(transaction) = self.pending.take() else {
            return;
        };

        if let Err(TrySendError::Full(transaction)) = self.tx.try_send(transaction) {
            self.pending = Some(transaction);
        }
    }
}

struct ProcessHandler {
    out_ports: Vec<jack::Port<jack::AudioOut>>,
    in_ports: Vec<(jack::Port<jack::AudioIn>, HeapProducer<f32>)>,
    transaction: Option<Transaction>,
    finished: ReturnSlot,
    msg_rx: Receiver<Message>,
}

impl jack::ProcessHandler for ProcessHandler {
    fn process(&mut self, _: &jack::Client, process_scope: &jack::ProcessScope) -> jack::Control {
        self.finished.flush();

        if self.finished.is_empty() {
            if let Ok(msg) = self.msg_rx.try_recv() {
                match msg {
                    Message::Transaction(transaction) => self.transaction = Some(transaction),
                    Message::Abort => self.finished.put(self.transaction.take()),
                }
            }
        }

        let Some(transaction) = &mut self.transaction else {
            for port in self.out_ports.iter_mut() {
                port.as_mut_slice(process_scope).fill(0.0);
            }
            return jack::Control::Continue;
        };

        let start = transaction.position;
        let remaining = transaction.output.nrows() - start;

        for (channel, port) in self.out_ports.iter_mut().enumerate() {
            let out = port.as_mut_slice(process_scope);

            for (n, o) in out.iter_mut().enumerate() {
                *o = if n < remaining && channel < transaction.output.ncols() {
                    transaction.output[[start + n, channel]]
                } else {
                    0.0
                };
            }
        }

        let mut frames = 0;
        for (port, producer) in self.in_ports.iter_mut().take(transaction.input_channels) {
            let captured = port.as_slice(process_scope);
            let captured = &captured[..captured.len().min(remaining)];
            producer.push_slice(captured);
            frames = captured.len();
        }

        transaction.position += if transaction.input_channels == 0 {
            (process_scope.n_frames() as usize).min(remaining)
        } else {
            frames
        };

        if transaction.position >= transaction.output.nrows() {
            self.finished.put(self.transaction.take());
        }

        jack::Control::Continue
    }
}

/// JACK client with one port per physical channel.
///
/// Captured audio is handed to the caller through one ring buffer per input
/// port, the caller polls them while the transaction runs.
pub struct JackDevice {
    client: jack::AsyncClient<(), ProcessHandler>,
    msg_tx: SyncSender<Message>,
    finished_rx: Receiver<Transaction>,
    next_id: u64,
    consumers: Vec<HeapConsumer<f32>>,
    output_channels: usize,
}

impl JackDevice {
    /// Registers one output port per entry of `playback` and one input port
    /// per entry of `capture` and connects them. `None` selects every
    /// physical port of the server.
    pub fn new(
        name: &str,
        playback: Option<&[String]>,
        capture: Option<&[String]>,
    ) -> Result<Self, DeviceError> {
        let (client, _status) = jack::Client::new(name, jack::ClientOptions::NO_START_SERVER)?;

        let physical =
            |flags: PortFlags| client.ports(None, Some(PORT_TYPE), PortFlags::IS_PHYSICAL | flags);
        let playback = playback.map_or_else(|| physical(PortFlags::IS_INPUT), <[String]>::to_vec);
        let capture = capture.map_or_else(|| physical(PortFlags::IS_OUTPUT), <[String]>::to_vec);

        let ring_size = client.sample_rate() as usize;

        let out_ports = (0..playback.len())
            .map(|n| client.register_port(&format!("out_{n}"), jack::AudioOut::default()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut in_ports = Vec::with_capacity(capture.len());
        let mut consumers = Vec::with_capacity(capture.len());
        for n in 0..capture.len() {
            let port = client.register_port(&format!("in_{n}"), jack::AudioIn::default())?;
            let (producer, consumer) = HeapRb::<f32>::new(ring_size).split();

            in_ports.push((port, producer));
            consumers.push(consumer);
        }

        let out_names = out_ports
            .iter()
            .map(|p| p.name())
            .collect::<Result<Vec<_>, _>>()?;
        let in_names = in_ports
            .iter()
            .map(|(p, _)| p.name())
            .collect::<Result<Vec<_>, _>>()?;

        let (msg_tx, msg_rx) = sync_channel(64);
        let (finished_tx, finished_rx) = sync_channel(4);

        let process_handler = ProcessHandler {
            out_ports,
            in_ports,
            transaction: None,
            finished: ReturnSlot::new(finished_tx),
            msg_rx,
        };

        let client = client.activate_async((), process_handler)?;

        for (port, dest) in out_names.iter().zip(playback.iter()) {
            client.as_client().connect_ports_by_name(port, dest)?;
        }

        for (port, source) in in_names.iter().zip(capture.iter()) {
            client.as_client().connect_ports_by_name(source, port)?;
        }

        tracing::info!(
            playback = ?playback,
            capture = ?capture,
            "jack client {name} connected"
        );

        Ok(Self {
            client,
            msg_tx,
            finished_rx,
            next_id: 0,
            consumers,
            output_channels: out_names.len(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.client.as_client().sample_rate() as u32
    }

    pub fn input_channels(&self) -> usize {
        self.consumers.len()
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    fn drain(&mut self, captured: &mut [Vec<f32>], n_frames: usize) {
        let mut chunk = [0.0f32; 1024];

        for (consumer, samples) in self.consumers.iter_mut().zip(captured.iter_mut()) {
            while samples.len() < n_frames {
                let n = consumer.pop_slice(&mut chunk[..(n_frames - samples.len()).min(1024)]);
                if n == 0 {
                    break;
                }
                samples.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

impl DuplexDevice for JackDevice {
    fn check_settings(&self, settings: &StreamSettings) -> Result<(), DeviceError> {
        if settings.input_channels > self.input_channels()
            || settings.output_channels > self.output_channels()
        {
            return Err(DeviceError::ChannelConfiguration {
                input: settings.input_channels,
                output: settings.output_channels,
                max_input: self.input_channels(),
                max_output: self.output_channels(),
            });
        }

        if settings.sample_rate != self.sample_rate() {
            return Err(DeviceError::SampleRate {
                requested: settings.sample_rate,
                actual: self.sample_rate(),
            });
        }

        Ok(())
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        for consumer in self.consumers.iter_mut() {
            while consumer.pop().is_some() {}
        }

        Ok(())
    }

    fn duplex_transact(
        &mut self,
        output: ArrayView2<'_, f32>,
        input_channels: usize,
        stop: &StopSignal,
    ) -> Result<Array2<f32>, DeviceError> {
        self.check_settings(&StreamSettings {
            sample_rate: self.sample_rate(),
            input_channels,
            output_channels: output.ncols(),
        })?;

        let n_frames = output.nrows();
        let id = self.next_id;
        self.next_id += 1;

        // leftovers of aborted transactions
        while self.finished_rx.try_recv().is_ok() {}

        self.msg_tx
            .send(Message::Transaction(Transaction {
                id,
                output: output.to_owned(),
                input_channels,
                position: 0,
            }))
            .map_err(|_| DeviceError::Backend("process handler is gone".to_string()))?;

        let mut captured = vec![Vec::with_capacity(n_frames); input_channels];

        loop {
            if stop.is_stopped() {
                let _ = self.msg_tx.send(Message::Abort);
                return Err(DeviceError::Cancelled);
            }

            self.drain(&mut captured, n_frames);

            match self.finished_rx.try_recv() {
                Ok(transaction) if transaction.id == id => break,
                Ok(_) => {}
                Err(TryRecvError::Empty) => std::thread::sleep(POLL_INTERVAL),
                Err(TryRecvError::Disconnected) => {
                    return Err(DeviceError::Backend("process handler is gone".to_string()))
                }
            }
        }

        self.drain(&mut captured, n_frames);

        if let Some(short) = captured.iter().find(|c| c.len() != n_frames) {
            return Err(DeviceError::LengthMismatch {
                expected: n_frames,
                actual: short.len(),
            });
        }

        Ok(Array2::from_shape_fn((n_frames, input_channels), |(n, c)| {
            captured[c][n]
        }))
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc::sync_channel;

    use ndarray::Array2;

    use super::{ReturnSlot, Transaction};

    fn transaction(id: u64) -> Transaction {
        Transaction {
            id,
            output: Array2::zeros((16, 2)),
            input_channels: 2,
            position: 16,
        }
    }

    #[test]
    fn finished_transactions_reach_the_caller() {
        let (tx, rx) = sync_channel(4);
        let mut slot = ReturnSlot::new(tx);

        slot.put(Some(transaction(7)));
        slot.put(None);

        assert!(slot.is_empty());
        let returned = rx.try_recv().unwrap();
        assert_eq!(7, returned.id);
        assert_eq!(&[16, 2], returned.output.shape());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_channel_keeps_transaction_for_next_cycle() {
        let (tx, rx) = sync_channel(1);
        let mut slot = ReturnSlot::new(tx);

        slot.put(Some(transaction(1)));
        slot.put(Some(transaction(2)));
        assert!(!slot.is_empty());

        assert_eq!(1, rx.try_recv().unwrap().id);
        slot.flush();

        assert!(slot.is_empty());
        assert_eq!(2, rx.try_recv().unwrap().id);
    }
}
