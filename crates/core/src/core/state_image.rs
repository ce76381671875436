use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::graph::InteractionGraph;
use crate::storage;

pub const MAGIC_V1: &[u8; 8] = b"RWGRAPH1";

pub const VERSION_V1: u32 = 1;

/// Tags for chunks in the persisted state file.
const TAG_GRAPH: [u8; 4] = *b"GRPH";
const TAG_META: [u8; 4] = *b"META";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    #[serde(default)]
    pub saved_at: f64,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub edge_count: usize,
}

pub struct LoadedState {
    pub graph: InteractionGraph,
    pub meta: Option<StateMeta>,
}

pub fn is_state_magic(magic: &[u8; 8]) -> bool {
    magic == MAGIC_V1
}

pub fn save_state_to<W: Write>(w: &mut W, graph: &InteractionGraph, saved_at: f64) -> io::Result<()> {
    w.write_all(MAGIC_V1)?;
    storage::write_u32_le(w, VERSION_V1)?;

    let meta = StateMeta {
        saved_at,
        node_count: graph.node_count(),
        edge_count: graph.edge_count(),
    };
    let meta_bytes = serde_json::to_vec(&meta)?;
    let graph_bytes = serde_json::to_vec(graph)?;
    storage::write_chunk_lz4(w, TAG_META, &meta_bytes)?;
    storage::write_chunk_lz4(w, TAG_GRAPH, &graph_bytes)?;
    Ok(())
}

/// Encode the whole state file into memory.
pub fn encode_state(graph: &InteractionGraph, saved_at: f64) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    save_state_to(&mut buf, graph, saved_at)?;
    Ok(buf)
}

pub fn load_state_from<R: Read>(r: &mut R) -> io::Result<LoadedState> {
    let magic = storage::read_exact::<8, _>(r)?;
    if !is_state_magic(&magic) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad state magic"));
    }

    let version = storage::read_u32_le(r)?;
    if version != VERSION_V1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported state version",
        ));
    }

    let mut graph: Option<InteractionGraph> = None;
    let mut meta: Option<StateMeta> = None;

    loop {
        let (tag, len) = match storage::read_chunk_header(r) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        let buf = storage::read_chunk_body_lz4(r, len)?;

        if tag == TAG_GRAPH {
            graph = Some(serde_json::from_slice(&buf)?);
        } else if tag == TAG_META {
            meta = Some(serde_json::from_slice(&buf)?);
        }
        // Unknown chunks are skipped for forward compatibility.
    }

    let graph =
        graph.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing graph chunk"))?;

    Ok(LoadedState { graph, meta })
}
