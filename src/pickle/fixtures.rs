//! Writes pickles laid out the way Python 2's `cPickle.dump(obj, f, 2)` lays
//! out numpy, scipy and chumpy objects.

use crate::pickle::opcodes::*;

pub(crate) struct PickleWriter {
    buffer: Vec<u8>,
    next_memo: u32,
}

impl PickleWriter {
    pub fn new() -> Self {
        PickleWriter { buffer: vec![PROTO, 2], next_memo: 0 }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.buffer.push(STOP);
        self.buffer
    }

    pub fn mark(&mut self) {
        self.buffer.push(MARK);
    }

    pub fn pop(&mut self) {
        self.buffer.push(POP);
    }

    pub fn none(&mut self) {
        self.buffer.push(NONE);
    }

    pub fn bool(&mut self, value: bool) {
        self.buffer.push(if value { NEWTRUE } else { NEWFALSE });
    }

    pub fn int(&mut self, value: i64) {
        if (0..=0xff).contains(&value) {
            self.buffer.extend([BININT1, value as u8]);
        } else if (0..=0xffff).contains(&value) {
            self.buffer.push(BININT2);
            self.buffer.extend((value as u16).to_le_bytes());
        } else if let Ok(value) = i32::try_from(value) {
            self.buffer.push(BININT);
            self.buffer.extend(value.to_le_bytes());
        } else {
            self.buffer.extend([LONG1, 8]);
            self.buffer.extend(value.to_le_bytes());
        }
    }

    pub fn float(&mut self, value: f64) {
        self.buffer.push(BINFLOAT);
        self.buffer.extend(value.to_be_bytes());
    }

    pub fn short_binstring(&mut self, raw: &[u8]) {
        self.buffer.extend([SHORT_BINSTRING, raw.len() as u8]);
        self.buffer.extend_from_slice(raw);
    }

    pub fn binstring(&mut self, raw: &[u8]) {
        self.buffer.push(BINSTRING);
        self.buffer.extend((raw.len() as i32).to_le_bytes());
        self.buffer.extend_from_slice(raw);
    }

    pub fn binunicode(&mut self, text: &str) {
        self.buffer.push(BINUNICODE);
        self.buffer.extend((text.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(text.as_bytes());
    }

    pub fn key(&mut self, name: &str) {
        self.short_binstring(name.as_bytes());
    }

    pub fn empty_tuple(&mut self) {
        self.buffer.push(EMPTY_TUPLE);
    }

    pub fn tuple(&mut self) {
        self.buffer.push(TUPLE);
    }

    pub fn tuple1(&mut self) {
        self.buffer.push(TUPLE1);
    }

    pub fn tuple2(&mut self) {
        self.buffer.push(TUPLE2);
    }

    pub fn tuple3(&mut self) {
        self.buffer.push(TUPLE3);
    }

    pub fn empty_list(&mut self) {
        self.buffer.push(EMPTY_LIST);
    }

    pub fn appends(&mut self) {
        self.buffer.push(APPENDS);
    }

    pub fn empty_dict(&mut self) {
        self.buffer.push(EMPTY_DICT);
    }

    pub fn setitems(&mut self) {
        self.buffer.push(SETITEMS);
    }

    pub fn global(&mut self, module: &str, name: &str) {
        self.buffer.push(GLOBAL);
        self.buffer.extend_from_slice(module.as_bytes());
        self.buffer.push(b'\n');
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.push(b'\n');
    }

    pub fn reduce(&mut self) {
        self.buffer.push(REDUCE);
    }

    pub fn build(&mut self) {
        self.buffer.push(BUILD);
    }

    pub fn newobj(&mut self) {
        self.buffer.push(NEWOBJ);
    }

    pub fn put(&mut self) -> u32 {
        let index = self.next_memo;
        self.next_memo += 1;
        if index <= 0xff {
            self.buffer.extend([BINPUT, index as u8]);
        } else {
            self.buffer.push(LONG_BINPUT);
            self.buffer.extend(index.to_le_bytes());
        }
        index
    }

    pub fn get(&mut self, index: u32) {
        if index <= 0xff {
            self.buffer.extend([BINGET, index as u8]);
        } else {
            self.buffer.push(LONG_BINGET);
            self.buffer.extend(index.to_le_bytes());
        }
    }

    /// A dict whose entries are written by `fill` as alternating keys and values.
    pub fn dict(&mut self, fill: impl FnOnce(&mut Self)) {
        self.empty_dict();
        self.put();
        self.mark();
        fill(self);
        self.setitems();
    }

    /// `cls.__new__(cls)` followed by `BUILD` with a `__dict__` written by `fill`.
    pub fn object(&mut self, module: &str, name: &str, fill: impl FnOnce(&mut Self)) {
        self.global(module, name);
        self.put();
        self.empty_tuple();
        self.newobj();
        self.put();
        self.dict(fill);
        self.build();
    }

    pub fn dtype(&mut self, descr: &str, byte_order: &str) {
        self.global("numpy", "dtype");
        self.put();
        self.key(descr);
        self.int(0);
        self.int(1);
        self.tuple3();
        self.reduce();
        self.put();
        self.mark();
        self.int(3);
        self.key(byte_order);
        self.none();
        self.none();
        self.none();
        self.int(-1);
        self.int(-1);
        self.int(0);
        self.tuple();
        self.build();
    }

    pub fn ndarray(&mut self, descr: &str, byte_order: &str, shape: &[usize], fortran: bool, raw: &[u8]) {
        self.global("numpy.core.multiarray", "_reconstruct");
        self.put();
        self.global("numpy", "ndarray");
        self.put();
        self.int(0);
        self.tuple1();
        self.key("b");
        self.tuple3();
        self.reduce();
        self.put();
        self.mark();
        self.int(1);
        self.mark();
        for dimension in shape {
            self.int(*dimension as i64);
        }
        self.tuple();
        self.dtype(descr, byte_order);
        self.bool(fortran);
        self.binstring(raw);
        self.tuple();
        self.build();
    }

    pub fn ndarray_f64(&mut self, shape: &[usize], data: &[f64]) {
        let raw = data.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
        self.ndarray("f8", "<", shape, false, &raw);
    }

    pub fn ndarray_i32(&mut self, shape: &[usize], data: &[i32]) {
        let raw = data.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
        self.ndarray("i4", "<", shape, false, &raw);
    }

    pub fn ndarray_u32(&mut self, shape: &[usize], data: &[u32]) {
        let raw = data.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
        self.ndarray("u4", "<", shape, false, &raw);
    }

    pub fn ndarray_i64(&mut self, shape: &[usize], data: &[i64]) {
        let raw = data.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<_>>();
        self.ndarray("i8", "<", shape, false, &raw);
    }

    /// A `scipy.sparse.csc_matrix` as pickled by scipy 0.x under Python 2.
    pub fn csc_matrix(&mut self, shape: (usize, usize), data: &[f64], indices: &[i32], indptr: &[i32]) {
        self.object("scipy.sparse.csc", "csc_matrix", |w| {
            w.key("_shape");
            w.int(shape.0 as i64);
            w.int(shape.1 as i64);
            w.tuple2();
            w.key("format");
            w.key("csc");
            w.key("data");
            w.ndarray_f64(&[data.len()], data);
            w.key("indices");
            w.ndarray_i32(&[indices.len()], indices);
            w.key("indptr");
            w.ndarray_i32(&[indptr.len()], indptr);
            w.key("maxprint");
            w.int(50);
        });
    }

    pub fn identity_csc(&mut self, size: usize) {
        let data = vec![1.0; size];
        let indices = (0..size as i32).collect::<Vec<_>>();
        let indptr = (0..=size as i32).collect::<Vec<_>>();
        self.csc_matrix((size, size), &data, &indices, &indptr);
    }

    /// A leaf `chumpy.ch.Ch` whose value is written by `fill`.
    pub fn chumpy(&mut self, fill: impl FnOnce(&mut Self)) {
        self.object("chumpy.ch", "Ch", |w| {
            w.key("x");
            fill(w);
            w.key("_itr");
            w.none();
        });
    }
}
