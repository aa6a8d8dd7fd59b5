use std::collections::HashMap;

use crate::configuration::Configuration;
use crate::frame::Symbol;
use crate::profiler::Profiler;
use crate::runtime::FailureKind;

#[derive(Debug, Deserialize, Serialize)]
pub struct ProfileSerializer {
    configuration: Configuration,
    summary: Summary,
    #[serde(rename = "frames")]
    frame_table: HashMap<FrameTableId, FrameTableEntry>,
    #[serde(skip)]
    frame_ids: HashMap<Symbol, FrameTableId>,
    traces: Vec<TraceEntry>,
    methods: Vec<MethodEntry>,
}

// Assigned in order of first use
type FrameTableId = u64;

#[derive(Debug, Deserialize, Serialize)]
struct Summary {
    attempts: u64,
    samples: u64,
    // Only non-zero failures, keyed by label
    failures: HashMap<String, u64>,
    frame_buffer_full: u64,
    frame_buffer_overflow: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct FrameTableEntry {
    id: FrameTableId,
    entry_type: FrameTableEntryType,
    full_label: String,
}

#[derive(Debug, Deserialize, Serialize)]
enum FrameTableEntryType {
    Managed,
    Native,
}

#[derive(Debug, Deserialize, Serialize)]
struct TraceEntry {
    counter: u64,
    // Innermost first
    frames: Vec<FrameTableId>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MethodEntry {
    counter: u64,
    frame: FrameTableId,
}

impl ProfileSerializer {
    /// JSON snapshot of the `max_traces` most frequent traces and the whole
    /// flat profile.
    pub fn serialize(profiler: &Profiler, max_traces: usize) -> Result<String, serde_json::Error> {
        let stats = profiler.stats();
        let mut serializer = ProfileSerializer {
            configuration: profiler.configuration().clone(),
            summary: Summary {
                attempts: stats.attempts,
                samples: stats.samples,
                failures: FailureKind::ALL
                    .iter()
                    .filter(|kind| stats.failure(**kind) != 0)
                    .map(|kind| (kind.label().to_string(), stats.failure(*kind)))
                    .collect(),
                frame_buffer_full: stats.frame_buffer_full,
                frame_buffer_overflow: profiler
                    .frame_buffer()
                    .is_some_and(|frame_buffer| frame_buffer.overflowed()),
            },
            frame_table: HashMap::new(),
            frame_ids: HashMap::new(),
            traces: vec![],
            methods: vec![],
        };

        if let Some(frame_buffer) = profiler.frame_buffer() {
            for trace in profiler.traces().sorted_samples().into_iter().take(max_traces) {
                let frames = frame_buffer
                    .frames(trace.frames)
                    .iter()
                    .map(|frame| serializer.frame_id(profiler, frame.symbol))
                    .collect();
                serializer.traces.push(TraceEntry {
                    counter: trace.counter,
                    frames,
                });
            }
        }

        for method in profiler.methods().sorted_samples() {
            let frame = serializer.frame_id(profiler, method.symbol);
            serializer.methods.push(MethodEntry {
                counter: method.counter,
                frame,
            });
        }

        serde_json::to_string(&serializer)
    }

    fn frame_id(&mut self, profiler: &Profiler, symbol: Symbol) -> FrameTableId {
        if let Some(id) = self.frame_ids.get(&symbol) {
            return *id;
        }
        let id = self.frame_ids.len() as FrameTableId;
        self.frame_ids.insert(symbol, id);
        self.frame_table.insert(
            id,
            FrameTableEntry {
                id,
                entry_type: match symbol {
                    Symbol::Method(_) => FrameTableEntryType::Managed,
                    Symbol::Named(_) => FrameTableEntryType::Native,
                },
                full_label: profiler.symbol_name(symbol),
            },
        );
        id
    }
}
