use flower_proto::TOP_K;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

/// Flower labels in the order the bundled classifier emits its scores. The
/// model has two more outputs than the 102 Oxford categories, so the table
/// carries 104 entries.
pub const FLOWER_CLASSES: [&str; 104] = [
    "pink primrose",
    "hard-leaved pocket orchid",
    "canterbury bells",
    "sweet pea",
    "wild geranium",
    "tiger lily",
    "moon orchid",
    "bird of paradise",
    "monkshood",
    "globe thistle",
    "snapdragon",
    "colt's foot",
    "king protea",
    "spear thistle",
    "yellow iris",
    "globe-flower",
    "purple coneflower",
    "peruvian lily",
    "balloon flower",
    "giant white arum lily",
    "fire lily",
    "pincushion flower",
    "fritillary",
    "red ginger",
    "grape hyacinth",
    "corn poppy",
    "prince of wales feathers",
    "stemless gentian",
    "artichoke",
    "sweet william",
    "carnation",
    "garden phlox",
    "love in the mist",
    "cosmos",
    "alpine sea holly",
    "ruby-lipped cattleya",
    "cape flower",
    "great masterwort",
    "siam tulip",
    "lenten rose",
    "barberton daisy",
    "daffodil",
    "sword lily",
    "poinsettia",
    "bolero deep blue",
    "wallflower",
    "marigold",
    "buttercup",
    "daisy",
    "common dandelion",
    "petunia",
    "wild pansy",
    "primula",
    "sunflower",
    "lilac hibiscus",
    "bishop of llandaff",
    "gaura",
    "geranium",
    "orange dahlia",
    "pink-yellow dahlia",
    "cautleya spicata",
    "japanese anemone",
    "black-eyed susan",
    "silverbush",
    "californian poppy",
    "osteospermum",
    "spring crocus",
    "iris",
    "windflower",
    "tree poppy",
    "gazania",
    "azalea",
    "water lily",
    "rose",
    "thorn apple",
    "morning glory",
    "passion flower",
    "lotus",
    "toad lily",
    "anthurium",
    "frangipani",
    "clematis",
    "hibiscus",
    "columbine",
    "desert-rose",
    "tree mallow",
    "magnolia",
    "cyclamen",
    "watercress",
    "canna lily",
    "hippeastrum",
    "bee balm",
    "pink quill",
    "foxglove",
    "bougainvillea",
    "camellia",
    "mallow",
    "mexican petunia",
    "bromelia",
    "blanket flower",
    "trumpet creeper",
    "blackberry lily",
    "common tulip",
    "wild rose",
];

#[derive(Error, Debug)]
pub enum ClassTableError {
    #[error("failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("class table needs at least {min} labels, got {0}", min = TOP_K)]
    TooFewLabels(usize),
}

/// Ordered mapping from model output index to a human-readable label.
///
/// The order must match the model's output ordering exactly; the table is
/// never reordered after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTable {
    labels: Vec<String>,
}

impl ClassTable {
    pub fn new(labels: Vec<String>) -> Result<Self, ClassTableError> {
        if labels.len() < TOP_K {
            return Err(ClassTableError::TooFewLabels(labels.len()));
        }
        Ok(Self { labels })
    }

    pub fn flowers() -> Self {
        Self {
            labels: FLOWER_CLASSES.iter().map(|label| label.to_string()).collect(),
        }
    }

    /// One label per line, blank lines skipped.
    pub fn from_file(path: &Path) -> Result<Self, ClassTableError> {
        let file = File::open(path)?;
        let reader = io::BufReader::new(file);
        let mut labels = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let label = line.trim();
            if label.is_empty() {
                continue;
            }
            labels.push(label.to_string());
        }

        Self::new(labels)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
