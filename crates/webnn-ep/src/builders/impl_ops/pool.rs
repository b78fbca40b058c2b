use std::sync::Arc;

use super::{add_output, input_operand, input_shape, invalid, to_u32_pair};
use crate::backend::{
    AutoPad, InputOperandLayout, MlBackend, MlGraphBuilder, Pool2dOptions, PoolKind,
};
use crate::builders::helper::{
    handle_auto_pad, onnx_pads_to_backend, tensor_shape, AutoPadType, NodeAttrHelper,
};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

struct PoolOpBuilder;

fn pool_kind(op_type: &str) -> Option<(PoolKind, bool)> {
    match op_type {
        "AveragePool" => Some((PoolKind::Average, false)),
        "MaxPool" => Some((PoolKind::Max, false)),
        "GlobalAveragePool" => Some((PoolKind::Average, true)),
        "GlobalMaxPool" => Some((PoolKind::Max, true)),
        _ => None,
    }
}

impl<B: MlBackend> OpBuilder<B> for PoolOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let (kind, global) =
            pool_kind(&node.op_type).ok_or_else(|| invalid(node, "unknown pooling operator"))?;
        let input = input_operand(model_builder, node, 0)?;
        let mut options = Pool2dOptions {
            layout: InputOperandLayout::Nchw,
            ..Pool2dOptions::default()
        };

        if !global {
            let helper = NodeAttrHelper::new(node);
            let kernel = helper.get_ints("kernel_shape", &[]);
            let window = to_u32_pair(node, "kernel_shape", &kernel)?;
            let pads = helper.get_ints("pads", &[0, 0, 0, 0]);
            let strides = helper.get_ints("strides", &[1, 1]);
            let dilations = helper.get_ints("dilations", &[1, 1]);
            let auto_pad = AutoPadType::parse(&helper.get_string("auto_pad", "NOTSET"))
                .ok_or_else(|| invalid(node, "unknown auto_pad"))?;
            let input_dims = input_shape(model_builder.graph(), node, 0)?;
            let auto_pad = handle_auto_pad(
                &input_dims,
                kernel[0],
                kernel[1],
                &pads,
                &strides,
                &dilations,
                auto_pad,
            )
            .map_err(|reason| invalid(node, reason))?;

            options.window_dimensions = Some(window);
            options.strides = to_u32_pair(node, "strides", &strides)?;
            options.dilations = to_u32_pair(node, "dilations", &dilations)?;
            match auto_pad {
                AutoPadType::SameUpper => options.auto_pad = AutoPad::SameUpper,
                AutoPadType::SameLower => options.auto_pad = AutoPad::SameLower,
                AutoPadType::Valid => options.padding = [0; 4],
                AutoPadType::NotSet => {
                    options.padding = onnx_pads_to_backend(&pads)
                        .ok_or_else(|| invalid(node, format!("invalid pads {pads:?}")))?;
                }
            }
        }

        let output = model_builder.builder().pool2d(kind, &input, options)?;
        add_output(model_builder, node, output)
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let name = &node.name;
        let op_type = &node.op_type;
        let Some((kind, global)) = pool_kind(op_type) else {
            return false;
        };
        let rank = node
            .input(0)
            .and_then(|input| tensor_shape(graph, input))
            .map(|shape| shape.len());
        if rank != Some(4) {
            log::debug!("{op_type} [{name}] only 4-D input is supported");
            return false;
        }
        if global {
            return true;
        }

        let helper = NodeAttrHelper::new(node);
        let kernel = helper.get_ints("kernel_shape", &[]);
        if kernel.len() != 2 || kernel.iter().any(|&k| k < 1) {
            log::debug!("{op_type} [{name}] kernel_shape {kernel:?} is not 2-D");
            return false;
        }
        if helper.get_int("ceil_mode", 0) != 0 {
            log::debug!("{op_type} [{name}] ceil_mode is not supported");
            return false;
        }
        if helper.get_ints("dilations", &[1, 1]) != [1, 1] {
            log::debug!("{op_type} [{name}] dilations are not supported");
            return false;
        }
        let pads = helper.get_ints("pads", &[0, 0, 0, 0]);
        if onnx_pads_to_backend(&pads).is_none() {
            log::debug!("{op_type} [{name}] pads {pads:?} are invalid");
            return false;
        }
        let strides = helper.get_ints("strides", &[1, 1]);
        if strides.len() != 2 || strides.iter().any(|&s| s < 1) {
            log::debug!("{op_type} [{name}] strides {strides:?} are invalid");
            return false;
        }
        if AutoPadType::parse(&helper.get_string("auto_pad", "NOTSET")).is_none() {
            log::debug!("{op_type} [{name}] unknown auto_pad");
            return false;
        }

        match kind {
            PoolKind::Average => {
                if helper.get_int("count_include_pad", 0) != 0 {
                    log::debug!("AveragePool [{name}] count_include_pad is not supported");
                    return false;
                }
            }
            PoolKind::Max => {
                if helper.get_int("storage_order", 0) != 0 {
                    log::debug!("MaxPool [{name}] storage_order is not supported");
                    return false;
                }
                if node.output(1).is_some() {
                    log::debug!("MaxPool [{name}] indices output is not supported");
                    return false;
                }
            }
        }
        true
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(
        &["AveragePool", "MaxPool", "GlobalAveragePool", "GlobalMaxPool"],
        Arc::new(PoolOpBuilder),
    );
}
