pub mod lexer;
pub mod token;
pub mod tree;

pub use lexer::tokenize;
pub use token::{AttrToken, CommentVariant, Token, TokenKind};
pub use tree::{
    decode_entities, decode_source, parse, serialize, AttributeNode, CommentNode, Document,
    ElementNode, PiNode, RawNode, TextNode, XmlNode,
};
