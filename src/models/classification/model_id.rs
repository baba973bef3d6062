//! Closed set of supported classification architectures.

use crate::core::ClassifyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generates the [`ModelId`] enum together with its string mapping.
macro_rules! model_ids {
    ($($variant:ident => $key:literal),* $(,)?) => {
        /// Identifier of a pretrained ImageNet classifier.
        ///
        /// The string key matches the torchvision builder name the weights
        /// were exported from, and the file stem of the ONNX export.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum ModelId {
            $(
                #[doc = concat!("`", $key, "`")]
                #[serde(rename = $key)]
                $variant,
            )*
        }

        impl ModelId {
            /// Every known architecture, in declaration order.
            pub const ALL: &'static [ModelId] = &[$(ModelId::$variant),*];

            /// The string key of this model.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ModelId::$variant => $key,)*
                }
            }
        }

        impl FromStr for ModelId {
            type Err = ClassifyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($key => Ok(ModelId::$variant),)*
                    _ => Err(ClassifyError::unknown_model(s)),
                }
            }
        }
    };
}

model_ids! {
    AlexNet => "alexnet",
    DenseNet121 => "densenet121",
    EfficientNetB0 => "efficientnet_b0",
    GoogLeNet => "googlenet",
    MobileNetV2 => "mobilenet_v2",
    MobileNetV3Large => "mobilenet_v3_large",
    ResNet18 => "resnet18",
    ResNet34 => "resnet34",
    ResNet50 => "resnet50",
    ResNet101 => "resnet101",
    ResNet152 => "resnet152",
    ShuffleNetV2X10 => "shufflenet_v2_x1_0",
    SqueezeNet11 => "squeezenet1_1",
    Vgg16 => "vgg16",
    Vgg19 => "vgg19",
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
