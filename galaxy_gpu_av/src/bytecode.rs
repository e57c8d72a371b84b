//! SPIR-V word-stream helpers
//!
//! SPIR-V is a stream of variable-length instructions: the high half of the
//! first word is the word count, the low half the opcode. There is no way to
//! jump to the n-th instruction, so everything here walks forward from the
//! five-word header.

use std::hash::Hasher;
use rustc_hash::FxHasher;

/// Identifier of one instrumented shader version (content hash or counter)
pub type ShaderId = u32;

/// Number of words in the module header
pub const HEADER_WORDS: usize = 5;

/// Extended instruction set name of the non-semantic debug info encoding
pub const SHADER_DEBUG_INFO_SET_NAME: &str = "NonSemantic.Shader.DebugInfo.100";

/// `DebugSource` in NonSemantic.Shader.DebugInfo.100
pub const DEBUG_INFO_SOURCE: u32 = 35;
/// `DebugLine` in NonSemantic.Shader.DebugInfo.100
pub const DEBUG_INFO_LINE: u32 = 103;

/// Whether the first word is the SPIR-V magic number
pub fn has_spirv_magic(words: &[u32]) -> bool {
    words.first() == Some(&spirv::MAGIC_NUMBER)
}

/// Content hash of a shader, stable for identical words
pub fn shader_hash(words: &[u32]) -> ShaderId {
    let mut hasher = FxHasher::default();
    hasher.write(bytemuck::cast_slice(words));
    hasher.write_usize(words.len());
    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as ShaderId
}

/// One instruction borrowed from a module's words
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'a> {
    words: &'a [u32],
}

impl<'a> Instruction<'a> {
    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xffff
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Operand word at `index` (0 is the opcode word), 0 when out of range
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    /// Decode the nul-terminated literal string starting at word `index`
    pub fn string_at(&self, index: usize) -> String {
        let tail = self.words.get(index..).unwrap_or(&[]);
        let bytes: &[u8] = bytemuck::cast_slice(tail);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    /// Number of words taken by the literal string starting at word `index`
    pub fn string_word_len(&self, index: usize) -> usize {
        let tail = self.words.get(index..).unwrap_or(&[]);
        tail.iter()
            .position(|w| w.to_le_bytes().contains(&0))
            .map(|p| p + 1)
            .unwrap_or(tail.len())
    }
}

/// Forward iterator over the instructions following the header
///
/// Stops at the first malformed instruction (zero word count or running
/// past the end of the module).
pub struct Instructions<'a> {
    words: &'a [u32],
    position: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = *self.words.get(self.position)?;
        let word_count = (first >> 16) as usize;
        if word_count == 0 || self.position + word_count > self.words.len() {
            self.position = self.words.len();
            return None;
        }
        let insn = Instruction {
            words: &self.words[self.position..self.position + word_count],
        };
        self.position += word_count;
        Some(insn)
    }
}

/// Iterate the instructions of a module
pub fn instructions(words: &[u32]) -> Instructions<'_> {
    Instructions {
        words,
        position: HEADER_WORDS.min(words.len()),
    }
}

/// Encode a string as SPIR-V literal words (nul-terminated, zero padded)
pub fn encode_string(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Readable name of a SPIR-V execution model
pub fn execution_model_name(model: u32) -> String {
    let name = match model {
        0 => "Vertex",
        1 => "TessellationControl",
        2 => "TessellationEvaluation",
        3 => "Geometry",
        4 => "Fragment",
        5 => "GLCompute",
        6 => "Kernel",
        5267 => "TaskNV",
        5268 => "MeshNV",
        5313 => "RayGenerationKHR",
        5314 => "IntersectionKHR",
        5315 => "AnyHitKHR",
        5316 => "ClosestHitKHR",
        5317 => "MissKHR",
        5318 => "CallableKHR",
        5364 => "TaskEXT",
        5365 => "MeshEXT",
        other => return format!("Unknown({})", other),
    };
    name.to_string()
}

#[cfg(test)]
#[path = "bytecode_tests.rs"]
mod tests;
