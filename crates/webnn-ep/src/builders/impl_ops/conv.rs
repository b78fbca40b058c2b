use std::sync::Arc;

use super::{
    add_output, input_operand, input_shape, invalid, required_input, to_u32_pair, to_u32_vec,
};
use crate::backend::{
    AutoPad, Conv2dOptions, ConvTranspose2dOptions, FilterOperandLayout, InputOperandLayout,
    MlBackend, MlGraphBuilder,
};
use crate::builders::helper::{
    handle_auto_pad, onnx_pads_to_backend, tensor_shape, AutoPadType, NodeAttrHelper,
};
use crate::builders::{ModelBuilder, OpBuilder, OpBuilderRegistry};
use crate::error::CompileResult;
use crate::graph::{GraphView, Node};
use crate::options::DeviceType;

/// Conv and ConvTranspose; both take a constant 4-D filter.
struct ConvOpBuilder;

impl ConvOpBuilder {
    fn add_conv<B: MlBackend>(
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let helper = NodeAttrHelper::new(node);
        let input = input_operand(model_builder, node, 0)?;
        let filter = input_operand(model_builder, node, 1)?;
        let input_dims = input_shape(model_builder.graph(), node, 0)?;
        let weight_dims = model_builder
            .initializer(required_input(node, 1)?)
            .map(|weight| weight.dims.clone())
            .ok_or_else(|| invalid(node, "weight must be a constant initializer"))?;
        if weight_dims.len() != 4 {
            return Err(invalid(node, "only 2-D convolution is supported"));
        }

        let pads = helper.get_ints("pads", &[0, 0, 0, 0]);
        let strides = helper.get_ints("strides", &[1, 1]);
        let dilations = helper.get_ints("dilations", &[1, 1]);
        let auto_pad = AutoPadType::parse(&helper.get_string("auto_pad", "NOTSET"))
            .ok_or_else(|| invalid(node, "unknown auto_pad"))?;
        let auto_pad = handle_auto_pad(
            &input_dims,
            weight_dims[2],
            weight_dims[3],
            &pads,
            &strides,
            &dilations,
            auto_pad,
        )
        .map_err(|reason| invalid(node, reason))?;

        let mut options = Conv2dOptions {
            strides: to_u32_pair(node, "strides", &strides)?,
            dilations: to_u32_pair(node, "dilations", &dilations)?,
            groups: u32::try_from(helper.get_int("group", 1))
                .map_err(|_| invalid(node, "group must be positive"))?,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Oihw,
            ..Conv2dOptions::default()
        };
        match auto_pad {
            AutoPadType::SameUpper => options.auto_pad = AutoPad::SameUpper,
            AutoPadType::SameLower => options.auto_pad = AutoPad::SameLower,
            AutoPadType::Valid => options.padding = [0; 4],
            AutoPadType::NotSet => {
                options.padding = onnx_pads_to_backend(&pads)
                    .ok_or_else(|| invalid(node, format!("invalid pads {pads:?}")))?;
            }
        }
        if node.input(2).is_some() {
            options.bias = Some(input_operand(model_builder, node, 2)?);
        }
        options.activation = model_builder.find_activation(node, 0);

        let output = model_builder.builder().conv2d(&input, &filter, options)?;
        add_output(model_builder, node, output)
    }

    fn add_conv_transpose<B: MlBackend>(
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        let helper = NodeAttrHelper::new(node);
        let input = input_operand(model_builder, node, 0)?;
        let filter = input_operand(model_builder, node, 1)?;

        let pads = helper.get_ints("pads", &[0, 0, 0, 0]);
        let mut options = ConvTranspose2dOptions {
            padding: onnx_pads_to_backend(&pads)
                .ok_or_else(|| invalid(node, format!("invalid pads {pads:?}")))?,
            strides: to_u32_pair(node, "strides", &helper.get_ints("strides", &[1, 1]))?,
            dilations: to_u32_pair(node, "dilations", &helper.get_ints("dilations", &[1, 1]))?,
            output_padding: to_u32_pair(
                node,
                "output_padding",
                &helper.get_ints("output_padding", &[0, 0]),
            )?,
            groups: u32::try_from(helper.get_int("group", 1))
                .map_err(|_| invalid(node, "group must be positive"))?,
            input_layout: InputOperandLayout::Nchw,
            filter_layout: FilterOperandLayout::Iohw,
            ..ConvTranspose2dOptions::default()
        };
        if helper.has_attr("output_shape") {
            let output_shape = helper.get_ints("output_shape", &[]);
            // The attribute may carry the full NCHW shape or just H and W.
            let spatial = match output_shape.len() {
                4 => &output_shape[2..],
                _ => &output_shape[..],
            };
            options.output_sizes = Some(to_u32_pair(node, "output_shape", spatial)?);
        }
        if node.input(2).is_some() {
            options.bias = Some(input_operand(model_builder, node, 2)?);
        }
        options.activation = model_builder.find_activation(node, 0);

        let output = model_builder
            .builder()
            .conv_transpose2d(&input, &filter, options)?;
        add_output(model_builder, node, output)
    }
}

impl<B: MlBackend> OpBuilder<B> for ConvOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_, B>,
        node: &Node,
    ) -> CompileResult<()> {
        if node.op_type == "ConvTranspose" {
            Self::add_conv_transpose(model_builder, node)
        } else {
            Self::add_conv(model_builder, node)
        }
    }

    fn is_op_supported_impl(&self, graph: &GraphView, node: &Node, _device: DeviceType) -> bool {
        let name = &node.name;
        let Some(weight_name) = node.input(1) else {
            log::debug!("{} [{name}] has no weight", node.op_type);
            return false;
        };
        let Some(weight) = graph.initializer(weight_name) else {
            log::debug!("The weight of {} [{name}] must be known", node.op_type);
            return false;
        };
        if weight.dims.len() != 4 {
            log::debug!(
                "{} [{name}] dimension: {} Only conv 2d is supported.",
                node.op_type,
                weight.dims.len()
            );
            return false;
        }

        let rank = node
            .input(0)
            .and_then(|input| tensor_shape(graph, input))
            .map(|shape| shape.len());
        if rank != Some(4) {
            log::debug!("{} [{name}] input must be 4-D", node.op_type);
            return false;
        }

        let helper = NodeAttrHelper::new(node);
        let pads = helper.get_ints("pads", &[0, 0, 0, 0]);
        if onnx_pads_to_backend(&pads).is_none() {
            log::debug!("{} [{name}] pads {pads:?} are not four non-negative values", node.op_type);
            return false;
        }
        for key in ["strides", "dilations"] {
            let values = helper.get_ints(key, &[1, 1]);
            if to_u32_vec(node, key, &values).map_or(true, |v| v.len() != 2 || v.contains(&0)) {
                log::debug!("{} [{name}] {key} {values:?} unsupported", node.op_type);
                return false;
            }
        }
        let auto_pad = helper.get_string("auto_pad", "NOTSET");
        match AutoPadType::parse(&auto_pad) {
            None => {
                log::debug!("{} [{name}] unknown auto_pad {auto_pad}", node.op_type);
                return false;
            }
            Some(AutoPadType::SameUpper | AutoPadType::SameLower)
                if node.op_type == "ConvTranspose" =>
            {
                log::debug!("ConvTranspose [{name}] auto_pad {auto_pad} is not supported");
                return false;
            }
            Some(_) => {}
        }
        true
    }
}

pub(super) fn register<B: MlBackend>(registry: &mut OpBuilderRegistry<B>) {
    registry.register(&["Conv", "ConvTranspose"], Arc::new(ConvOpBuilder));
}
