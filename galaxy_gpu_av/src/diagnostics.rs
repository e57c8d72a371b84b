//! Diagnostic message reconstruction
//!
//! An instrumented shader reports a failure as a handful of integers: which
//! shader, which stage, up to three stage-specific invocation coordinates and
//! the index of the failing instruction. This module turns that back into
//! text using the code kept in the registry.

use std::fmt::Write;
use rustc_hash::FxHashMap;

use crate::bytecode::{
    execution_model_name, instructions, ShaderId, DEBUG_INFO_LINE, DEBUG_INFO_SOURCE,
    SHADER_DEBUG_INFO_SET_NAME,
};
use crate::gpuav_error;
use crate::handles::CommandBufferHandle;
use crate::registry::InstrumentedShader;
use crate::stages::PipelineBindPoint;

/// Stage id reported when the module has several entry points
pub const STAGE_ID_MULTI_ENTRY_POINT: u32 = 0x7fff_ffff;

/// Debug names set by the application on its objects
pub trait ObjectNameLookup {
    fn object_name(&self, handle: u64) -> Option<String>;
}

/// Lookup that knows no names
pub struct NoObjectNames;

impl ObjectNameLookup for NoObjectNames {
    fn object_name(&self, _handle: u64) -> Option<String> {
        None
    }
}

/// Failure record read back from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationReport {
    pub command_buffer: CommandBufferHandle,
    pub shader_id: ShaderId,
    /// SPIR-V execution model, or `STAGE_ID_MULTI_ENTRY_POINT`
    pub stage_id: u32,
    pub stage_info: [u32; 3],
    /// Index of the failing instruction, counted from the first one after
    /// the header
    pub instruction_position: u32,
    pub bind_point: PipelineBindPoint,
    /// Index of the draw / dispatch / trace within the command buffer
    pub operation_index: u32,
}

/// Stage line of the message, ends with a newline
pub fn stage_message(stage_id: u32, stage_info: [u32; 3], spirv: &[u32]) -> String {
    let [a, b, c] = stage_info;
    let mut message = match stage_id {
        STAGE_ID_MULTI_ENTRY_POINT => {
            let models: Vec<String> = instructions(spirv)
                .take_while(|insn| insn.opcode() != spirv::Op::Function as u32)
                .filter(|insn| insn.opcode() == spirv::Op::EntryPoint as u32)
                .map(|insn| execution_model_name(insn.word(1)))
                .collect();
            format!(
                "Stage has multiple OpEntryPoint ({}) and could not detect stage. ",
                models.join(", ")
            )
        }
        0 => format!("Stage = Vertex. Vertex Index = {} Instance Index = {}. ", a, b),
        1 => format!(
            "Stage = Tessellation Control.  Invocation ID = {}, Primitive ID = {}",
            a, b
        ),
        2 => format!(
            "Stage = Tessellation Eval.  Primitive ID = {}, TessCoord (u, v) = ({}, {}). ",
            a, b, c
        ),
        3 => format!("Stage = Geometry.  Primitive ID = {} Invocation ID = {}. ", a, b),
        4 => format!(
            "Stage = Fragment.  Fragment coord (x,y) = ({}, {}). ",
            f32::from_bits(a),
            f32::from_bits(b)
        ),
        5 => format!(
            "Stage = Compute.  Global invocation ID (x, y, z) = ({}, {}, {})",
            a, b, c
        ),
        5313..=5318 => {
            let name = match stage_id {
                5313 => "Ray Generation",
                5314 => "Intersection",
                5315 => "Any Hit",
                5316 => "Closest Hit",
                5317 => "Miss",
                _ => "Callable",
            };
            format!(
                "Stage = {}.  Global Launch ID (x,y,z) = ({}, {}, {}). ",
                name, a, b, c
            )
        }
        5364 | 5365 | 5267 | 5268 => {
            let name = match stage_id {
                5364 => "TaskEXT",
                5365 => "MeshEXT",
                5267 => "TaskNV",
                _ => "MeshNV",
            };
            format!(
                "Stage = {}. Global invocation ID (x, y, z) = ({}, {}, {} )",
                name, a, b, c
            )
        }
        unexpected => {
            gpuav_error!("gpuav::Diagnostics", "Unexpected stage id {} in violation report", unexpected);
            format!("Internal Error (unexpected stage = {}). ", unexpected)
        }
    };
    message.push('\n');
    message
}

/// Last line marker seen before the failing instruction
#[derive(Debug, Clone, Copy)]
enum LineMarker {
    /// `OpLine file line column`
    OpLine { file: u32, line: u32, column: u32 },
    /// `DebugLine source line_start line_end column_start column_end`,
    /// operands are constant ids
    DebugLine { source: u32, line: u32, column: u32 },
}

/// Definitions collected on the way to the failing instruction
#[derive(Default)]
struct DebugDefinitions {
    strings: FxHashMap<u32, String>,
    constants: FxHashMap<u32, u32>,
    /// DebugSource id -> (file string id, text string id)
    debug_sources: FxHashMap<u32, (u32, Option<u32>)>,
    /// OpSource file id -> embedded text
    op_sources: FxHashMap<u32, String>,
}

impl DebugDefinitions {
    fn resolve(&self, marker: LineMarker) -> (Option<String>, u32, u32, Option<&str>) {
        match marker {
            LineMarker::OpLine { file, line, column } => (
                self.strings.get(&file).cloned(),
                line,
                column,
                self.op_sources.get(&file).map(String::as_str),
            ),
            LineMarker::DebugLine { source, line, column } => {
                let line = self.constants.get(&line).copied().unwrap_or(0);
                let column = self.constants.get(&column).copied().unwrap_or(0);
                match self.debug_sources.get(&source) {
                    Some(&(file, text)) => (
                        self.strings.get(&file).cloned(),
                        line,
                        column,
                        text.and_then(|t| self.strings.get(&t)).map(String::as_str),
                    ),
                    None => (None, line, column, None),
                }
            }
        }
    }
}

/// Source location part of the message
///
/// Walks forward to `instruction_position` remembering the most recent
/// `OpLine` or `DebugLine`. Line markers do not carry over a function end.
pub fn find_shader_source(spirv: &[u32], instruction_position: u32, debug_printf_only: bool) -> String {
    let mut out = format!("SPIR-V Instruction Index = {}\n", instruction_position);

    let mut definitions = DebugDefinitions::default();
    let mut debug_info_set = None;
    let mut last_op_source_file = None;
    let mut last_line = None;

    for (index, insn) in instructions(spirv).enumerate() {
        let opcode = insn.opcode();
        if opcode == spirv::Op::ExtInstImport as u32 {
            if insn.string_at(2) == SHADER_DEBUG_INFO_SET_NAME {
                debug_info_set = Some(insn.word(1));
            }
        } else if opcode == spirv::Op::String as u32 {
            definitions.strings.insert(insn.word(1), insn.string_at(2));
        } else if opcode == spirv::Op::Constant as u32 && insn.word_count() == 4 {
            definitions.constants.insert(insn.word(2), insn.word(3));
        } else if opcode == spirv::Op::Source as u32 {
            last_op_source_file = None;
            if insn.word_count() > 3 {
                let file = insn.word(3);
                let text = if insn.word_count() > 4 { insn.string_at(4) } else { String::new() };
                definitions.op_sources.insert(file, text);
                last_op_source_file = Some(file);
            }
        } else if opcode == spirv::Op::SourceContinued as u32 {
            if let Some(text) = last_op_source_file.and_then(|f| definitions.op_sources.get_mut(&f)) {
                text.push_str(&insn.string_at(1));
            }
        }

        let is_debug_info =
            opcode == spirv::Op::ExtInst as u32 && debug_info_set == Some(insn.word(3));
        if is_debug_info && insn.word(4) == DEBUG_INFO_SOURCE {
            let text = (insn.word_count() > 6).then(|| insn.word(6));
            definitions.debug_sources.insert(insn.word(2), (insn.word(5), text));
        }

        if is_debug_info && insn.word(4) == DEBUG_INFO_LINE {
            last_line = Some(LineMarker::DebugLine {
                source: insn.word(5),
                line: insn.word(6),
                column: insn.word(8),
            });
        } else if opcode == spirv::Op::Line as u32 {
            last_line = Some(LineMarker::OpLine {
                file: insn.word(1),
                line: insn.word(2),
                column: insn.word(3),
            });
        } else if opcode == spirv::Op::FunctionEnd as u32 {
            last_line = None;
        }

        if index as u32 == instruction_position {
            break;
        }
    }

    let Some(marker) = last_line else {
        out.push_str("Unable to source. Build shader with debug info to get source information.\n");
        return out;
    };

    out.push_str(if debug_printf_only {
        "Debug shader printf message generated "
    } else {
        "Shader validation error occurred "
    });

    let (file, line, column, text) = definitions.resolve(marker);
    if let Some(file) = file {
        let _ = write!(out, "in file {} ", file);
    }
    let _ = write!(out, "at line {}", line);
    if column != 0 {
        let _ = write!(out, ", column {}", column);
    }
    out.push('\n');

    let source_line = text
        .filter(|_| line > 0)
        .and_then(|t| t.lines().nth(line as usize - 1));
    if let Some(source_line) = source_line {
        let _ = writeln!(out, "{}: {}", line, source_line.trim_end());
    }
    out
}

fn object_label(names: &dyn ObjectNameLookup, handle: u64) -> String {
    match names.object_name(handle) {
        Some(name) if !name.is_empty() => format!("({})", name),
        _ => String::new(),
    }
}

/// Full message for one violation
///
/// `shader` is the registry entry for `report.shader_id`, if any.
pub fn generate_debug_info_message(
    report: &ViolationReport,
    shader: Option<&InstrumentedShader>,
    names: &dyn ObjectNameLookup,
    debug_printf_only: bool,
) -> String {
    let shader = match shader {
        Some(shader) if !shader.spirv.is_empty() => shader,
        _ => return "[Internal Error] - Can't get instructions from shader_map\n".to_string(),
    };

    let mut out = stage_message(report.stage_id, report.stage_info, &shader.spirv);
    let command_buffer = report.command_buffer.as_raw();

    if shader.shader_module.is_null() && shader.shader_object.is_null() {
        let _ = writeln!(
            out,
            "[Internal Error] - Unable to locate shader/pipeline handles used in command buffer {}({:#x})",
            object_label(names, command_buffer),
            command_buffer
        );
    } else {
        let _ = writeln!(
            out,
            "Command buffer {}({:#x})",
            object_label(names, command_buffer),
            command_buffer
        );
        let operation = match report.bind_point {
            PipelineBindPoint::Graphics => "Draw",
            PipelineBindPoint::Compute => "Compute Dispatch",
            PipelineBindPoint::RayTracing => "Ray Trace",
        };
        let _ = writeln!(out, "\t{} Index {}", operation, report.operation_index);

        if shader.shader_module.is_null() {
            let object = shader.shader_object.as_raw();
            let _ = writeln!(
                out,
                "Shader Object {}({:#x}) (internal ID {:x})",
                object_label(names, object),
                object,
                report.shader_id
            );
        } else {
            let pipeline = shader.pipeline.as_raw();
            let _ = write!(out, "Pipeline {}({:#x})", object_label(names, pipeline), pipeline);
            if shader.shader_module == crate::handles::ShaderModuleHandle::PIPELINE_STAGE_INFO {
                let _ = writeln!(
                    out,
                    " (internal ID {:x})\nShader Module was passed in via VkPipelineShaderStageCreateInfo::pNext",
                    report.shader_id
                );
            } else {
                let module = shader.shader_module.as_raw();
                let _ = writeln!(
                    out,
                    "\nShader Module {}({:#x}) (internal ID {:x})",
                    object_label(names, module),
                    module,
                    report.shader_id
                );
            }
        }
    }

    out.push_str(&find_shader_source(
        &shader.spirv,
        report.instruction_position,
        debug_printf_only,
    ));
    out
}

#[cfg(test)]
#[path = "diagnostics_tests.rs"]
mod tests;
