//! The operation graph: builder API, validation, compilation, and
//! execution.

pub mod context;
pub(crate) mod node;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use log::{debug, info};

use crate::asm;
use crate::attributes::{
    ConvDGradAttr, ConvFPropAttr, ConvWGradAttr, MatmulAttr, PointwiseAttr, TensorAttr, TensorRef,
};
use crate::backend::{Buffer, Handle};
use crate::cache::{CacheFile, CachedAssetKind, CachedAssets};
use crate::compile::CompileCommand;
use crate::graph::context::Context;
use crate::graph::node::{
    ConvDGradNode, ConvFPropNode, ConvWGradNode, MatmulNode, Node, PointwiseNode,
};
use crate::runtime::{ExecutionPlan, Session};
use crate::types::{DataType, Error, Result};

/// Per-execution binding from tensor identity to device buffer.
pub type VariantPack = HashMap<TensorRef, Buffer>;

/// Result of a cache probe plus (re)compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    /// Path of the compiled module in the cache.
    pub path: PathBuf,
    /// True when the artifact was (re)generated rather than reused.
    pub recompiled: bool,
}

/// The root of the operation graph.
///
/// Lifecycle: build (infallible) -> [`Graph::validate`] ->
/// [`Graph::compile`] -> [`Graph::execute`]. Calls on one graph must
/// be serialized by the caller; distinct graphs may compile and run
/// concurrently on distinct handles.
#[derive(Default)]
pub struct Graph {
    context: Context,
    nodes: Vec<Node>,
    full_graph_inputs: Vec<TensorRef>,
    full_graph_outputs: Vec<TensorRef>,
    inputs_sorted: Vec<TensorRef>,
    outputs_sorted: Vec<TensorRef>,
    is_validated: bool,
    cache: Option<CachedAssets>,
    session: Option<Box<dyn Session>>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Graph {
        self.context.set_name(name);
        self
    }

    pub fn set_io_data_type(&mut self, data_type: DataType) -> &mut Graph {
        self.context.set_io_data_type(data_type);
        self
    }

    pub fn set_compute_data_type(&mut self, data_type: DataType) -> &mut Graph {
        self.context.set_compute_data_type(data_type);
        self
    }

    pub fn set_intermediate_data_type(&mut self, data_type: DataType) -> &mut Graph {
        self.context.set_intermediate_data_type(data_type);
        self
    }

    /// Copies `attr` into the graph inputs and returns the shared
    /// reference all further uses go through.
    pub fn tensor(&mut self, attr: TensorAttr) -> TensorRef {
        debug!("adding input tensor '{}' to graph", attr.name());
        let tensor = TensorRef::new(attr);
        self.full_graph_inputs.push(tensor.clone());
        tensor
    }

    /// Creates the virtual output tensor of an operator and registers
    /// it with the graph outputs. The caller may later promote it with
    /// `set_output(true)`.
    fn output_tensor(&mut self, name: String) -> TensorRef {
        debug!("adding output tensor '{name}' to graph");
        let tensor = TensorRef::new(TensorAttr::new().set_name(name).set_is_virtual(true));
        self.full_graph_outputs.push(tensor.clone());
        tensor
    }

    /// Appends a forward convolution of `x` by `w`, returning the
    /// virtual response tensor Y.
    pub fn conv_fprop(
        &mut self,
        x: &TensorRef,
        w: &TensorRef,
        mut attr: ConvFPropAttr,
    ) -> TensorRef {
        if attr.name().is_empty() {
            attr.set_name_mut(format!("conv_fprop_{}", self.nodes.len()));
        }
        if x.name().is_empty() {
            x.set_name(format!("{}_X", attr.name()));
        }
        if w.name().is_empty() {
            w.set_name(format!("{}_W", attr.name()));
        }
        info!("adding conv fprop node '{}' to graph", attr.name());
        let y = self.output_tensor(format!("{}_Y", attr.name()));
        let attr = attr.set_x(x).set_w(w).set_y(&y);
        self.nodes.push(Node::ConvFProp(ConvFPropNode {
            attr,
            context: self.context.clone(),
        }));
        y
    }

    /// Appends a data-gradient convolution of `dy` by `w`, returning
    /// the virtual image gradient DX.
    pub fn conv_dgrad(
        &mut self,
        dy: &TensorRef,
        w: &TensorRef,
        mut attr: ConvDGradAttr,
    ) -> TensorRef {
        if attr.name().is_empty() {
            attr.set_name_mut(format!("conv_dgrad_{}", self.nodes.len()));
        }
        if dy.name().is_empty() {
            dy.set_name(format!("{}_DY", attr.name()));
        }
        if w.name().is_empty() {
            w.set_name(format!("{}_W", attr.name()));
        }
        info!("adding conv dgrad node '{}' to graph", attr.name());
        let dx = self.output_tensor(format!("{}_DX", attr.name()));
        let attr = attr.set_dy(dy).set_w(w).set_dx(&dx);
        self.nodes.push(Node::ConvDGrad(ConvDGradNode {
            attr,
            context: self.context.clone(),
        }));
        dx
    }

    /// Appends a weight-gradient convolution of `dy` by `x`, returning
    /// the virtual filter gradient DW.
    pub fn conv_wgrad(
        &mut self,
        dy: &TensorRef,
        x: &TensorRef,
        mut attr: ConvWGradAttr,
    ) -> TensorRef {
        if attr.name().is_empty() {
            attr.set_name_mut(format!("conv_wgrad_{}", self.nodes.len()));
        }
        if dy.name().is_empty() {
            dy.set_name(format!("{}_DY", attr.name()));
        }
        if x.name().is_empty() {
            x.set_name(format!("{}_X", attr.name()));
        }
        info!("adding conv wgrad node '{}' to graph", attr.name());
        let dw = self.output_tensor(format!("{}_DW", attr.name()));
        let attr = attr.set_dy(dy).set_x(x).set_dw(&dw);
        self.nodes.push(Node::ConvWGrad(ConvWGradNode {
            attr,
            context: self.context.clone(),
        }));
        dw
    }

    /// Appends an element-wise binary op on `a` and `b`, returning the
    /// virtual result OUT_0.
    pub fn pointwise(
        &mut self,
        a: &TensorRef,
        b: &TensorRef,
        mut attr: PointwiseAttr,
    ) -> TensorRef {
        if attr.name().is_empty() {
            attr.set_name_mut(format!("pointwise_{}", self.nodes.len()));
        }
        if a.name().is_empty() {
            a.set_name(format!("{}_IN_0", attr.name()));
        }
        if b.name().is_empty() {
            b.set_name(format!("{}_IN_1", attr.name()));
        }
        info!("adding pointwise node '{}' to graph", attr.name());
        let out = self.output_tensor(format!("{}_OUT_0", attr.name()));
        let attr = attr.set_in0(a).set_in1(b).set_out0(&out);
        self.nodes.push(Node::Pointwise(PointwiseNode {
            attr,
            context: self.context.clone(),
        }));
        out
    }

    /// Appends a matrix multiplication of `a` by `b`, returning the
    /// virtual product C.
    pub fn matmul(&mut self, a: &TensorRef, b: &TensorRef, mut attr: MatmulAttr) -> TensorRef {
        if attr.name().is_empty() {
            attr.set_name_mut(format!("matmul_{}", self.nodes.len()));
        }
        if a.name().is_empty() {
            a.set_name(format!("{}_A", attr.name()));
        }
        if b.name().is_empty() {
            b.set_name(format!("{}_B", attr.name()));
        }
        info!("adding matmul node '{}' to graph", attr.name());
        let c = self.output_tensor(format!("{}_C", attr.name()));
        let attr = attr.set_a(a).set_b(b).set_c(&c);
        self.nodes.push(Node::Matmul(MatmulNode {
            attr,
            context: self.context.clone(),
        }));
        c
    }

    /// Validates the graph and infers missing tensor properties.
    pub fn validate(&mut self) -> Result<()> {
        info!("validating graph '{}'", self.name());
        if self.name().is_empty() {
            return Err(Error::AttributeNotSet("graph name not set".to_string()));
        }
        self.pre_validate()?;
        for node in &self.nodes {
            node.pre_validate()?;
        }
        for node in &mut self.nodes {
            node.infer_properties()?;
        }
        for node in &self.nodes {
            node.post_validate()?;
        }
        for tensor in self
            .full_graph_inputs
            .iter()
            .chain(self.full_graph_outputs.iter())
        {
            tensor.validate()?;
        }
        self.materialize_sorted_io();
        self.is_validated = true;
        info!("graph '{}' validated", self.name());
        Ok(())
    }

    /// Tensor and node names must be unique: the emitter turns them
    /// into SSA value names.
    fn pre_validate(&self) -> Result<()> {
        let mut used = HashSet::new();
        for tensor in self
            .full_graph_inputs
            .iter()
            .chain(self.full_graph_outputs.iter())
        {
            let name = tensor.name();
            if !used.insert(name.clone()) {
                return Err(Error::InvalidAttribute(format!(
                    "symbol name '{name}' already in use"
                )));
            }
        }
        for node in &self.nodes {
            let name = node.name();
            if !used.insert(name.clone()) {
                return Err(Error::InvalidAttribute(format!(
                    "symbol name '{name}' already in use"
                )));
            }
        }
        Ok(())
    }

    /// Materializes the name-sorted I/O views that drive deterministic
    /// emission and execution order. Scalar literals and virtual
    /// tensors are not graph I/O.
    fn materialize_sorted_io(&mut self) {
        let mut inputs: Vec<TensorRef> = self
            .full_graph_inputs
            .iter()
            .filter(|t| !t.is_scalar() && !t.is_virtual())
            .cloned()
            .collect();
        inputs.sort_by_key(|t| t.name());
        self.inputs_sorted = inputs;

        let mut outputs: Vec<TensorRef> = self
            .full_graph_outputs
            .iter()
            .filter(|t| t.is_output())
            .cloned()
            .collect();
        outputs.sort_by_key(|t| t.name());
        self.outputs_sorted = outputs;
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn graph_inputs_sorted(&self) -> &[TensorRef] {
        &self.inputs_sorted
    }

    pub(crate) fn graph_outputs_sorted(&self) -> &[TensorRef] {
        &self.outputs_sorted
    }

    /// Emits the deterministic MLIR assembly for this graph. Identical
    /// graphs produce byte-identical output; the text doubles as the
    /// cache key.
    pub fn emit_asm(&self) -> Result<String> {
        if !self.is_validated {
            return Err(Error::NotValidated(
                "graph must be validated before emitting assembly".to_string(),
            ));
        }
        info!("emitting MLIR assembly for graph '{}'", self.name());
        Ok(asm::emit_graph(self))
    }

    /// Compiles the graph (or reuses the cache) and creates the
    /// per-graph runtime session. Set `remove` to delete the cache
    /// files when this graph is dropped.
    pub fn compile(&mut self, handle: &Handle, remove: bool) -> Result<()> {
        info!("compiling graph '{}'", self.name());
        if !self.is_validated {
            return Err(Error::NotValidated(
                "graph must be validated before being compiled".to_string(),
            ));
        }
        let generated_asm = self.emit_asm()?;
        let artifact = self.compiled_artifact(handle, &generated_asm, remove)?;
        let plan = ExecutionPlan::from_graph(self)?;
        self.session = Some(handle.device().create_session(plan, &artifact.path)?);
        Ok(())
    }

    /// Returns the compiled module path, recompiling unless the cache
    /// is valid for the current graph name, assembly, and backend.
    pub fn compiled_artifact(
        &mut self,
        handle: &Handle,
        generated_asm: &str,
        remove: bool,
    ) -> Result<CompiledArtifact> {
        if self.validate_cache(handle, generated_asm)? {
            let path = self
                .cache
                .as_ref()
                .expect("validated cache is populated")
                .output
                .path()
                .to_path_buf();
            debug!("cache hit for graph '{}'", self.name());
            return Ok(CompiledArtifact {
                path,
                recompiled: false,
            });
        }
        // Drop the stale record first so its scoped removal (if any)
        // does not race the fresh files written below.
        self.cache = None;
        let cache = self.generate_compiled_artifact(handle, generated_asm, remove)?;
        let path = cache.output.path().to_path_buf();
        self.cache = Some(cache);
        Ok(CompiledArtifact {
            path,
            recompiled: true,
        })
    }

    /// The cache is valid only when this instance generated it, the
    /// paths still match the graph name, the stored assembly equals
    /// the freshly generated assembly, and the stored command equals
    /// the freshly rebuilt command. On-disk files from other processes
    /// are never trusted: they may come from a different compiler
    /// version.
    fn validate_cache(&self, handle: &Handle, generated_asm: &str) -> Result<bool> {
        debug!("validating cache for graph '{}'", self.name());
        let Some(cache) = &self.cache else {
            debug!("cache not previously populated");
            return Ok(false);
        };
        if !cache.paths_match(self.name()) {
            debug!("cache paths differ");
            return Ok(false);
        }
        let stored_asm = match cache.input.read() {
            Ok(contents) => contents,
            Err(_) => {
                debug!("cached assembly unreadable");
                return Ok(false);
            }
        };
        if stored_asm != generated_asm {
            debug!("generated assembly does not match");
            return Ok(false);
        }
        let command = CompileCommand::build(handle.backend(), cache);
        let stored_command = match cache.compile_command.read() {
            Ok(contents) => contents,
            Err(_) => {
                debug!("cached compile command unreadable");
                return Ok(false);
            }
        };
        if stored_command != command.render() {
            debug!("compile command does not match");
            return Ok(false);
        }
        Ok(true)
    }

    fn generate_compiled_artifact(
        &self,
        handle: &Handle,
        generated_asm: &str,
        remove: bool,
    ) -> Result<CachedAssets> {
        info!("generating compiled artifacts for graph '{}'", self.name());
        let cache = CachedAssets::create(self.name(), remove)?;
        cache.input.write(generated_asm)?;
        let command = CompileCommand::build(handle.backend(), &cache);
        cache.compile_command.write(&command.render())?;
        command.run().map_err(|e| match e {
            Error::CompileFailure(message) => {
                Error::CompileFailure(format!("graph '{}': {message}", self.name()))
            }
            other => other,
        })?;
        Ok(cache)
    }

    /// Reads one of the four cached files for this graph.
    pub fn read_compilation_cache_file(&self, kind: CachedAssetKind) -> Result<String> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            Error::RuntimeFailure(format!(
                "graph '{}' has no compilation cache",
                self.name()
            ))
        })?;
        cache.file(kind).read()
    }

    /// The canonical cache path of one of the four cached files, for
    /// callers that need it before compiling.
    pub fn compilation_cache_path(&self, kind: CachedAssetKind) -> PathBuf {
        let file_name = match kind {
            CachedAssetKind::Input => crate::cache::COMPILE_INPUT_FILENAME,
            CachedAssetKind::Output => crate::cache::COMPILE_OUTPUT_FILENAME,
            CachedAssetKind::CompileCommand => crate::cache::COMPILE_COMMAND_FILENAME,
            CachedAssetKind::Statistics => crate::cache::COMPILE_STATISTICS_FILENAME,
        };
        CacheFile::canonical_path(self.name(), file_name)
    }

    /// Executes the compiled graph. `variant_pack` maps every graph
    /// input and output (by tensor identity) to a buffer; a null
    /// buffer on an output is the destination-passing placeholder and
    /// is reset to the view popped from the session.
    pub fn execute(&self, handle: &Handle, variant_pack: &VariantPack) -> Result<()> {
        info!(
            "executing graph '{}' on backend {}",
            self.name(),
            handle.backend()
        );
        let session = self.session.as_ref().ok_or_else(|| {
            Error::NotValidated("graph must be compiled before being executed".to_string())
        })?;

        // Arguments go in the same order the emitter laid out the
        // function parameters: outputs (sorted) then inputs (sorted).
        let mut args = Vec::with_capacity(self.outputs_sorted.len() + self.inputs_sorted.len());
        let mut output_buffers = Vec::with_capacity(self.outputs_sorted.len());
        for tensor in &self.outputs_sorted {
            let buffer = variant_pack.get(tensor).ok_or_else(|| {
                Error::InvalidAttribute(format!(
                    "variant pack has no buffer for output '{}'",
                    tensor.name()
                ))
            })?;
            args.push(buffer.view());
            output_buffers.push(buffer.clone());
        }
        for tensor in &self.inputs_sorted {
            let buffer = variant_pack.get(tensor).ok_or_else(|| {
                Error::InvalidAttribute(format!(
                    "variant pack has no buffer for input '{}'",
                    tensor.name()
                ))
            })?;
            let view = buffer.view().ok_or_else(|| {
                Error::RuntimeFailure(format!(
                    "input buffer for '{}' has no view",
                    tensor.name()
                ))
            })?;
            args.push(Some(view));
        }

        let outputs = session.execute(&args).map_err(|e| match e {
            Error::RuntimeFailure(message) => {
                Error::RuntimeFailure(format!("graph '{}': {message}", self.name()))
            }
            other => other,
        })?;
        if outputs.len() != output_buffers.len() {
            return Err(Error::RuntimeFailure(format!(
                "graph '{}': session returned {} outputs, expected {}",
                self.name(),
                outputs.len(),
                output_buffers.len()
            )));
        }
        for (buffer, view) in output_buffers.iter().zip(outputs) {
            if buffer.is_null() {
                buffer.reset(view);
            }
        }
        Ok(())
    }
}
