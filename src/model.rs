//! # Window Classifier
//!
//! Transformer encoder over a window of flow records that scores the last
//! record of the window.
//!
//! ```text
//! [B, W, D] ─ input ─▶ [B, W, E] ─ encoder layer × L ─▶ [B, W, E]
//!                                                          │ last position
//!                                                          ▼
//!                                           head ─▶ sigmoid ─▶ [B]
//! ```
//!
//! Each encoder layer is post-norm: `x = norm(x + attn(x))`,
//! `x = norm(x + ff(x))`, with RMS normalization so the same graph runs on
//! every candle backend.

use candle_core::{DType, Device, Module, ModuleT, Tensor, D};
use candle_nn::{Dropout, Init, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::FlowResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the hidden representation
    pub embed_dim: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    /// Hidden width of the feed-forward block
    pub ff_dim: usize,
    pub dropout: f32,
    pub norm_eps: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 256,
            num_heads: 2,
            num_layers: 4,
            ff_dim: 128,
            dropout: 0.1,
            norm_eps: 1e-5,
        }
    }
}

impl ModelConfig {
    /// Small configuration for tests and smoke runs
    pub fn tiny() -> Self {
        Self {
            embed_dim: 8,
            num_heads: 2,
            num_layers: 1,
            ff_dim: 16,
            dropout: 0.0,
            norm_eps: 1e-5,
        }
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.embed_dim == 0 || self.num_heads == 0 {
            return Err(FlowError::invalid_config(
                "embed_dim and num_heads must be positive",
            ));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(FlowError::invalid_config(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(FlowError::invalid_config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    fn new(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        Ok(Self { weight, eps })
    }
}

impl Module for RmsNorm {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let rms = (xs.sqr()?.mean_keepdim(D::Minus1)? + self.eps)?.sqrt()?;
        xs.broadcast_div(&rms)?.broadcast_mul(&self.weight)
    }
}

#[derive(Debug, Clone)]
struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    dropout: Dropout,
    num_heads: usize,
    scale: f64,
}

impl SelfAttention {
    fn new(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let e = config.embed_dim;
        let head_dim = e / config.num_heads;
        Ok(Self {
            query: candle_nn::linear(e, e, vb.pp("query"))?,
            key: candle_nn::linear(e, e, vb.pp("key"))?,
            value: candle_nn::linear(e, e, vb.pp("value"))?,
            output: candle_nn::linear(e, e, vb.pp("output"))?,
            dropout: Dropout::new(config.dropout),
            num_heads: config.num_heads,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// `[B, S, E] -> [B, H, S, E/H]`
    fn split_heads(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, s, e) = xs.dims3()?;
        xs.reshape((b, s, self.num_heads, e / self.num_heads))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl ModuleT for SelfAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let (b, s, e) = xs.dims3()?;
        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let probs = self.dropout.forward_t(&probs, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, s, e))?;
        self.output.forward(&context)
    }
}

#[derive(Debug, Clone)]
struct EncoderLayer {
    attention: SelfAttention,
    attention_norm: RmsNorm,
    ff_in: Linear,
    ff_out: Linear,
    ff_norm: RmsNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    fn new(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            attention: SelfAttention::new(config, vb.pp("attention"))?,
            attention_norm: RmsNorm::new(config.embed_dim, config.norm_eps, vb.pp("attention_norm"))?,
            ff_in: candle_nn::linear(config.embed_dim, config.ff_dim, vb.pp("ff_in"))?,
            ff_out: candle_nn::linear(config.ff_dim, config.embed_dim, vb.pp("ff_out"))?,
            ff_norm: RmsNorm::new(config.embed_dim, config.norm_eps, vb.pp("ff_norm"))?,
            dropout: Dropout::new(config.dropout),
        })
    }
}

impl ModuleT for EncoderLayer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let attended = self.attention.forward_t(xs, train)?;
        let attended = self.dropout.forward_t(&attended, train)?;
        let xs = self.attention_norm.forward(&(xs + attended)?)?;

        let ff = self.ff_in.forward(&xs)?.relu()?;
        let ff = self.dropout.forward_t(&ff, train)?;
        let ff = self.ff_out.forward(&ff)?;
        let ff = self.dropout.forward_t(&ff, train)?;
        self.ff_norm.forward(&(xs + ff)?)
    }
}

/// Scores windows of `input_dim`-wide records; outputs one probability per window
#[derive(Debug, Clone)]
pub struct WindowClassifier {
    input: Linear,
    layers: Vec<EncoderLayer>,
    head: Linear,
    input_dim: usize,
    config: ModelConfig,
}

impl WindowClassifier {
    pub fn new(input_dim: usize, config: ModelConfig, vb: VarBuilder) -> FlowResult<Self> {
        config.validate()?;
        if input_dim == 0 {
            return Err(FlowError::invalid_config("input_dim must be positive"));
        }

        let input = candle_nn::linear(input_dim, config.embed_dim, vb.pp("input"))?;
        let layers = (0..config.num_layers)
            .map(|i| EncoderLayer::new(&config, vb.pp(format!("layers.{i}"))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let head = candle_nn::linear(config.embed_dim, 1, vb.pp("head"))?;

        log::debug!(
            "WindowClassifier: input {} -> embed {} x {} layers ({} heads)",
            input_dim,
            config.embed_dim,
            config.num_layers,
            config.num_heads
        );

        Ok(Self {
            input,
            layers,
            head,
            input_dim,
            config,
        })
    }

    /// Build with freshly initialized weights in a new `VarMap`
    pub fn new_random(
        input_dim: usize,
        config: ModelConfig,
        device: &Device,
    ) -> FlowResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(input_dim, config, vb)?;
        Ok((model, varmap))
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl ModuleT for WindowClassifier {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let (_b, s, _d) = xs.dims3()?;
        let mut hidden = self.input.forward(xs)?;
        for layer in &self.layers {
            hidden = layer.forward_t(&hidden, train)?;
        }
        let last = hidden.narrow(1, s - 1, 1)?.squeeze(1)?;
        let logits = self.head.forward(&last)?.squeeze(D::Minus1)?;
        candle_nn::ops::sigmoid(&logits)
    }
}
