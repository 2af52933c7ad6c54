use error_set::error_set;

error_set!{
    ConversionError = PickleError || ModelError;
    PickleError = {
        #[display("Unexpected end of pickle data at offset {offset}")]
        UnexpectedEof{offset: usize},
        #[display("Unknown opcode {opcode} at offset {offset}")]
        UnknownOpcode{opcode: u8, offset: usize},
        #[display("Unsupported opcode {name} at offset {offset}")]
        UnsupportedOpcode{name: String, offset: usize},
        #[display("Pickle stack underflow at offset {offset}")]
        StackUnderflow{offset: usize},
        #[display("No mark on the pickle stack at offset {offset}")]
        MissingMark{offset: usize},
        #[display("Memo entry {index} referenced at offset {offset} was never stored")]
        MissingMemo{index: u64, offset: usize},
        #[display("Malformed literal '{literal}' at offset {offset}")]
        MalformedLiteral{literal: String, offset: usize},
        #[display("String at offset {offset} cannot be decoded as {encoding}")]
        Undecodable{encoding: String, offset: usize},
        #[display("Integer at offset {offset} does not fit in 64 bits")]
        IntegerOverflow{offset: usize},
        #[display("Expected {expected} on the pickle stack at offset {offset}")]
        TypeMismatch{expected: String, offset: usize},
    };
    ModelError = {
        #[display("Model root must be a dictionary, found {found}")]
        NotAMapping{found: String},
        #[display("Model field names must be text, found {found}")]
        NonTextKey{found: String},
        #[display("Unsupported array dtype: {descr}")]
        UnsupportedDtype{descr: String},
        #[display("Malformed array: {reason}")]
        MalformedArray{reason: String},
        #[display("Unsupported sparse matrix format: {format}")]
        UnsupportedSparseFormat{format: String},
        #[display("Malformed sparse matrix: {reason}")]
        MalformedSparse{reason: String},
        #[display("Symbolic array of class {class} holds no value to materialize")]
        UnmaterializableSymbolic{class: String},
        #[display("Object of class {class} has no attribute {attribute}")]
        MissingAttribute{class: String, attribute: String},
    };
}
