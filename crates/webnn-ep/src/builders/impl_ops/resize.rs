use std::sync::Arc;

use super::{add_output, input_operand, invalid};
use crate::backend::{InterpolationMode, MlBackend, MlGraphBuilder, Resample2dOptions};
use crate::builders::helper::{tensor_shape, NodeAttrHelper};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node, TensorProto};
use crate::options::DeviceType;

struct ResizeOpBuilder;

const ROI_IDX: usize = 1;
const SCALES_IDX: usize = 2;
const SIZES_IDX: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Scales([f32; 2]),
    Sizes([u32; 2]),
}

/// Optional constant input; an empty tensor counts as absent.
fn constant_input<'g>(
    graph: &'g GraphView,
    node: &Node,
    slot: usize,
) -> Result<Option<&'g TensorProto>, String> {
    match node.input(slot) {
        None => Ok(None),
        Some(name) => match graph.initializer(name) {
            Some(tensor) if tensor.element_count() == Some(0) => Ok(None),
            Some(tensor) => Ok(Some(tensor)),
            None => Err(format!("'{name}' must be a constant initializer")),
        },
    }
}

/// Reads the spatial resize target from the scales or sizes initializer.
///
/// Batch and channel must be left unchanged.
fn resize_target(graph: &GraphView, node: &Node) -> Result<Target, String> {
    let input = node
        .input(0)
        .and_then(|name| tensor_shape(graph, name))
        .ok_or("input shape is unknown")?;
    if input.len() != 4 {
        return Err(format!("only 4-D input is supported, got rank {}", input.len()));
    }

    if let Some(scales) = constant_input(graph, node, SCALES_IDX)? {
        let values = scales.to_f32_vec().map_err(|err| err.to_string())?;
        if values.len() != 4 {
            return Err(format!("scales must have 4 values, got {}", values.len()));
        }
        if values[0] != 1.0 || values[1] != 1.0 {
            return Err("scaling of batch or channel is not supported".to_string());
        }
        if values[2] <= 0.0 || values[3] <= 0.0 {
            return Err("scales must be positive".to_string());
        }
        return Ok(Target::Scales([values[2], values[3]]));
    }

    if let Some(sizes) = constant_input(graph, node, SIZES_IDX)? {
        let values = sizes.to_i64_vec().map_err(|err| err.to_string())?;
        if values.len() != 4 {
            return Err(format!("sizes must have 4 values, got {}", values.len()));
        }
        if values[0] != input[0] || values[1] != input[1] {
            return Err("resizing batch or channel is not supported".to_string());
        }
        let height = u32::try_from(values[2]).map_err(|_| "invalid height".to_string())?;
        let width = u32::try_from(values[3]).map_err(|_| "invalid width".to_string())?;
        if height == 0 || width == 0 {
            return Err("sizes must be positive".to_string());
        }
        return Ok(Target::Sizes([height, width]));
    }

    Err("either scales or sizes must be given".to_string())
}

fn interpolation_mode(node: &Node) -> Result<InterpolationMode, String> {
    let helper = NodeAttrHelper::new(node);
    let mode = match helper.get_string("mode", "nearest").as_str() {
        "nearest" => InterpolationMode::NearestNeighbor,
        "linear" => InterpolationMode::Linear,
        other => return Err(format!("mode {other} is not supported")),
    };
    let transform = helper.get_string("coordinate_transformation_mode", "half_pixel");
    if transform != "half_pixel" {
        return Err(format!("coordinate_transformation_mode {transform} is not supported"));
    }
    if mode == InterpolationMode::NearestNeighbor {
        let nearest_mode = helper.get_string("nearest_mode", "round_prefer_floor");
        if nearest_mode != "round_prefer_floor" {
            return Err(format!("nearest_mode {nearest_mode} is not supported"));
        }
    }
    Ok(mode)
}

impl<B: MlBackend> OpBuilder<B> for ResizeOpBuilder {
    fn add_initializers_to_skip(&self, model_builder: &mut ModelBuilder<'_, B>, node: &Node) {
        for slot in [ROI_IDX, SCALES_IDX, SIZES_IDX] {
            if let Some(name) = node.input(slot) {
                model_builder.add_initializer_to_skip(name);
            }
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let input = input_operand(model_builder, node, 0)?;
        let mode = interpolation_mode(node).map_err(|reason| invalid(node, reason))?;
        let target =
            resize_target(model_builder.graph(), node).map_err(|reason| invalid(node, reason))?;
        let mut options = Resample2dOptions {
            mode,
            axes: [2, 3],
            ..Resample2dOptions::default()
        };
        match target {
            Target::Scales(scales) => options.scales = Some(scales),
            Target::Sizes(sizes) => options.sizes = Some(sizes),
        }
        let output = model_builder.builder().resample2d(&input, options)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        if let Err(reason) = interpolation_mode(node).and_then(|_| resize_target(graph, node)) {
            log::debug!("Resize [{}] {reason}", node.name);
            return false;
        }
        true
    }

    // Opset 10 has no roi or sizes inputs.
    fn min_supported_opset(&self, _node: &Node) -> i64 {
        11
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Resize"], Arc::new(ResizeOpBuilder));
}
